use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use finrobot_run_client::{
    ApiClient, ClientConfig, DisplayDocument, FileKind, HistoryReconciler, LogKind,
    PreviewToggles, RenderedDocument, RunConsole, RunParams, RunViewState, ScriptRef, render,
};
use tracing::warn;

pub struct RunOptions {
    pub script: String,
    pub params: Vec<String>,
    pub lang: String,
    pub fill_defaults: bool,
    pub html: Option<PathBuf>,
}

pub async fn list_scripts(config: &ClientConfig) -> Result<()> {
    let api = ApiClient::new(config.clone())?;
    let scripts = api.list_scripts().await.context("failed to list scripts")?;
    if scripts.is_empty() {
        println!("No scripts available");
        return Ok(());
    }
    for info in &scripts {
        println!("{}", info.script_ref());
        for (key, spec) in &info.params {
            if spec.default_value.is_null() {
                println!("    {key} ({})", spec.kind);
            } else {
                println!("    {key} ({}) = {}", spec.kind, spec.default_value);
            }
        }
    }
    Ok(())
}

pub async fn list_models(config: &ClientConfig) -> Result<()> {
    let api = ApiClient::new(config.clone())?;
    let models = api.list_models().await.context("failed to list models")?;
    for entry in &models {
        let api_type = entry
            .extra
            .get("api_type")
            .and_then(|v| v.as_str())
            .unwrap_or("openai");
        match entry.extra.get("base_url").and_then(|v| v.as_str()) {
            Some(base_url) => println!("{} [{api_type}] {base_url}", entry.model),
            None => println!("{} [{api_type}]", entry.model),
        }
    }
    Ok(())
}

pub async fn run(config: &ClientConfig, options: RunOptions) -> Result<()> {
    let script = ScriptRef::parse(&options.script)?;
    let mut params = RunParams::new();
    for raw in &options.params {
        let (key, value) = parse_param(raw)?;
        params.insert(key, value);
    }

    let api = ApiClient::new(config.clone())?;
    if options.fill_defaults {
        match api.list_scripts().await {
            Ok(scripts) => {
                if let Some(info) = scripts.iter().find(|info| {
                    info.script_name == script.script
                        && (script.folder.is_empty() || info.folder == script.folder)
                }) {
                    params = info.params_with_defaults(&params);
                }
            }
            Err(err) => warn!(error = %err, "could not load script parameter defaults"),
        }
    }

    let mut console = RunConsole::connect(config.clone())?.lang(options.lang);
    if let Err(err) = console.select_script(script.clone()).await {
        warn!(error = %err, script = %script, "could not load run history");
    }
    console.submit(params)?;

    let tail = config.log_tail;
    let mut printed = 0usize;
    let finished = tokio::select! {
        view = console.wait_for_completion(|view| print_new_lines(view, &mut printed, tail)) => Some(view),
        _ = tokio::signal::ctrl_c() => None,
    };
    let Some(view) = finished else {
        console.stop();
        eprintln!("run stopped");
        return Ok(());
    };

    let rendered = render(&DisplayDocument::Current(view.result.clone()), config);
    if !rendered.is_empty() {
        println!();
        print!("{}", rendered.to_terminal());
    }
    if let Some(path) = &options.html {
        write_report(&api, &rendered, &script.to_string(), path).await?;
    }
    if let Some(error) = view.error {
        bail!("run of {script} failed: {error}");
    }
    Ok(())
}

pub async fn history_list(config: &ClientConfig, script: &str) -> Result<()> {
    let mut history = reconciler(config)?;
    history.load_history(script, false).await?;
    if history.records().is_empty() {
        println!("No history for {script}");
        return Ok(());
    }
    let selected = history.selection().id().map(str::to_string);
    for record in history.records() {
        let marker = if selected.as_deref() == Some(record.id.as_str()) { '*' } else { ' ' };
        println!("{marker} {}  {}", record.timestamp, record.label());
    }
    Ok(())
}

pub async fn history_show(
    config: &ClientConfig,
    script: &str,
    id: Option<&str>,
    html: Option<PathBuf>,
) -> Result<()> {
    let mut history = reconciler(config)?;
    history.load_history(script, false).await?;
    if let Some(id) = id {
        history.select(id)?;
    }
    let record = history
        .selected_record()
        .ok_or_else(|| anyhow!("no history for {script}"))?;
    println!("{} · {}\n", script, record.label());

    let rendered = render(&history.display_document(None), config);
    print!("{}", rendered.to_terminal());
    if let Some(path) = html {
        let api = ApiClient::new(config.clone())?;
        write_report(&api, &rendered, &format!("{script} {}", record.label()), &path).await?;
    }
    Ok(())
}

pub async fn history_delete(config: &ClientConfig, script: &str, timestamp: Option<&str>) -> Result<()> {
    let mut history = reconciler(config)?;
    history.delete_history(script, timestamp, false).await?;
    match timestamp {
        Some(timestamp) => println!("Deleted {timestamp} from {script}"),
        None => println!("Deleted all history of {script}"),
    }
    println!("{} record(s) left", history.records().len());
    Ok(())
}

pub async fn history_summary(config: &ClientConfig) -> Result<()> {
    let mut history = reconciler(config)?;
    let summary = history.summary().await?;
    if summary.scripts.is_empty() {
        println!("No history");
        return Ok(());
    }
    for (name, entry) in &summary.scripts {
        println!(
            "{name}: {} record(s), latest {}",
            entry.total_records, entry.latest_display_name
        );
    }
    Ok(())
}

fn reconciler(config: &ClientConfig) -> Result<HistoryReconciler> {
    let api = ApiClient::new(config.clone())?;
    Ok(HistoryReconciler::new(Arc::new(api), config.delete_policy))
}

fn print_new_lines(view: &RunViewState, printed: &mut usize, tail: usize) {
    if view.logs.len() < *printed {
        *printed = 0;
    }
    let fresh = view.logs.len() - *printed;
    for line in view.tail(fresh.min(tail)) {
        match line.kind {
            LogKind::Stdout => println!("{}", line.text),
            LogKind::Stderr => eprintln!("{}", line.text),
        }
    }
    *printed = view.logs.len();
}

async fn write_report(api: &ApiClient, rendered: &RenderedDocument, title: &str, path: &Path) -> Result<()> {
    let mut markdown = HashMap::new();
    for file in rendered.files.iter().filter(|f| f.kind == FileKind::Markdown) {
        match api.fetch_asset_text(&file.url).await {
            Ok(body) => {
                markdown.insert(file.url.clone(), body);
            }
            Err(err) => warn!(error = %err, url = %file.url, "could not inline markdown file"),
        }
    }
    let html = rendered.to_html(title, &PreviewToggles::default(), &|url: &str| {
        markdown.get(url).cloned()
    });
    std::fs::write(path, html).with_context(|| format!("failed to write {}", path.display()))?;
    println!("Report written to {}", path.display());
    Ok(())
}

/// Parses `key=value`; the value is JSON when it parses, else a plain string.
fn parse_param(raw: &str) -> Result<(String, serde_json::Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("parameter {raw:?} must be key=value"))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("parameter {raw:?} has an empty key");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

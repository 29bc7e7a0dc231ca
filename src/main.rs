use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use leer_tranquilo::core::config::load_config;
use leer_tranquilo::core::session::ShadowRootRegistry;
use leer_tranquilo::dom::html::{parse_page, serialize};
use leer_tranquilo::expansion::all_roots;
use leer_tranquilo::features::bootstrap::reachable_shadow_roots;
use leer_tranquilo::scraping::{render, SnapshotOptions};
use leer_tranquilo::{boot_frame, Classifier, KillSwitch, MemorySessionStore, Mode};

const USAGE: &str = "usage:
  leer-tranquilo expand <file.html> [--persistent] [--max-ms N] [--url URL] [--out FILE]
  leer-tranquilo inspect <file.html> [--url URL]
  leer-tranquilo snapshot <url> [--out FILE] [--no-scroll]";

/// Flags that take a value; everything else starting with `--` is boolean.
const VALUE_FLAGS: [&str; 3] = ["--max-ms", "--url", "--out"];

fn arg_value(args: &[String], name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == name {
            return it.next().cloned();
        } else if let Some(rest) = a.strip_prefix(&prefix) {
            return Some(rest.to_string());
        }
    }
    None
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

/// First argument that is neither a flag nor a flag's value.
fn positional(args: &[String]) -> Option<&str> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if VALUE_FLAGS.contains(&a.as_str()) {
            it.next();
        } else if !a.starts_with("--") {
            return Some(a);
        }
    }
    None
}

/// Pages loaded from disk still need a tuple origin, or every iframe would be
/// cross-origin to its parent.
fn page_url(args: &[String], path: &str) -> anyhow::Result<Url> {
    if let Some(url) = arg_value(args, "--url") {
        return Url::parse(&url).with_context(|| format!("invalid --url: {url}"));
    }
    let name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("index.html");
    Url::parse("https://localhost/")?
        .join(name)
        .context("cannot build a page URL from the file name")
}

async fn read_page(args: &[String]) -> anyhow::Result<(String, Url)> {
    let path = positional(args).ok_or_else(|| anyhow!("missing input file\n{USAGE}"))?;
    let markup = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read {path}"))?;
    Ok((markup, page_url(args, path)?))
}

async fn cmd_expand(args: &[String]) -> anyhow::Result<()> {
    let (markup, url) = read_page(args).await?;
    let mut config = load_config();
    let limit = match arg_value(args, "--max-ms") {
        Some(v) => Some(v.parse::<u64>().with_context(|| format!("invalid --max-ms: {v}"))?),
        None => None,
    };
    if let Some(ms) = limit {
        config.scheduler.max_duration_ms = ms;
    }
    let mode = if has_flag(args, "--persistent") {
        Mode::Persistent
    } else {
        Mode::OneShot
    };

    let dom = parse_page(url.clone(), &markup).shared();
    let document = dom.borrow().top_document();
    info!("expanding {} ({:?})", url, mode);

    let local = tokio::task::LocalSet::new();
    let report = local
        .run_until(async {
            let handle = boot_frame(
                dom.clone(),
                document,
                &config,
                KillSwitch::new(),
                MemorySessionStore::shared(),
            );
            if !handle.start(mode) {
                warn!("session did not start ({})", handle.status_label());
            }

            let session = Rc::clone(handle.session());
            let persistent_limit = limit.filter(|_| mode == Mode::Persistent);
            let watchdog = tokio::task::spawn_local(async move {
                tokio::select! {
                    Ok(()) = tokio::signal::ctrl_c() => {
                        warn!("interrupted: stopping session");
                        session.stop();
                    }
                    _ = tokio::time::sleep(Duration::from_millis(persistent_limit.unwrap_or(0))),
                        if persistent_limit.is_some() => {
                        session.freeze();
                    }
                    else => {}
                }
            });

            let report = handle.finished().await;
            watchdog.abort();
            handle.shutdown();
            report
        })
        .await;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(out) = arg_value(args, "--out") {
        let html = serialize(&dom.borrow(), document);
        tokio::fs::write(&out, html)
            .await
            .with_context(|| format!("cannot write {out}"))?;
        info!("expanded page written to {}", out);
    }
    Ok(())
}

async fn cmd_inspect(args: &[String]) -> anyhow::Result<()> {
    let (markup, url) = read_page(args).await?;
    let config = load_config();
    let dom = parse_page(url, &markup);
    let document = dom.top_document();

    let mut registry = ShadowRootRegistry::default();
    for root in reachable_shadow_roots(&dom, document) {
        registry.register_root(root);
    }
    let classifier = Classifier::new(&config.expansion);
    let roots = all_roots(&dom, document, &registry);
    let candidates = classifier.collect(&dom, &roots);

    for c in &candidates {
        let line = json!({
            "node": c.node.index(),
            "target": c.target.index(),
            "tag": dom.tag(c.target),
            "label": c.label,
            "matched": c.matched,
            "safe": c.is_safe,
        });
        println!("{line}");
    }
    info!(
        "{} candidates across {} roots ({} shadow)",
        candidates.len(),
        roots.len(),
        registry.len()
    );
    Ok(())
}

async fn cmd_snapshot(args: &[String]) -> anyhow::Result<()> {
    let url = positional(args).ok_or_else(|| anyhow!("missing url\n{USAGE}"))?;
    let options = SnapshotOptions {
        scroll: !has_flag(args, "--no-scroll"),
        ..SnapshotOptions::default()
    };
    let html = render(url, &options).await?;
    match arg_value(args, "--out") {
        Some(out) => {
            tokio::fs::write(&out, html)
                .await
                .with_context(|| format!("cannot write {out}"))?;
            info!("snapshot written to {}", out);
        }
        None => println!("{html}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing (stderr, so stdout stays machine-readable)
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        bail!("{USAGE}");
    };
    match command.as_str() {
        "expand" => cmd_expand(rest).await,
        "inspect" => cmd_inspect(rest).await,
        "snapshot" => cmd_snapshot(rest).await,
        "--help" | "-h" | "help" => {
            println!("{USAGE}");
            Ok(())
        }
        other => bail!("unknown command '{other}'\n{USAGE}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_positional_skips_flag_values() {
        let a = args(&["--url", "https://news.example/a", "page.html", "--persistent"]);
        assert_eq!(positional(&a), Some("page.html"));
        assert_eq!(arg_value(&a, "--url").as_deref(), Some("https://news.example/a"));
        assert!(has_flag(&a, "--persistent"));
    }

    #[test]
    fn test_default_page_url_is_https() {
        let url = page_url(&args(&[]), "/tmp/nota.html").unwrap();
        assert_eq!(url.as_str(), "https://localhost/nota.html");
        let url = page_url(&args(&["--url=https://diario.example/x"]), "nota.html").unwrap();
        assert_eq!(url.host_str(), Some("diario.example"));
    }
}

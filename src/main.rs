use anyhow::{Context, Result};
use clap::Parser;
use replay_shim::cli::{Cli, OutputFormat};
use replay_shim::{BackendStatus, Namespace, ProcessBinder, RecordReplay};
use serde::Serialize;
use std::ffi::CString;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

#[derive(Debug, Serialize)]
struct FeatureQuery {
    feature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    subfeature: Option<String>,
    enabled: bool,
    recording_or_replaying: bool,
}

#[derive(Debug, Serialize)]
struct ProbeReport {
    namespace: String,
    #[serde(flatten)]
    status: BackendStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<FeatureQuery>,
}

fn c_string(value: &str, what: &str) -> Result<CString> {
    CString::new(value).with_context(|| format!("{} must not contain NUL bytes", what))
}

fn select_namespace(args: &Cli) -> Result<Namespace> {
    match (&args.module, args.global) {
        (Some(module), _) => Ok(Namespace::module(c_string(module, "--module")?)),
        (None, true) => Ok(Namespace::Global),
        (None, false) => Ok(Namespace::platform_default()),
    }
}

fn query_feature(
    replay: &RecordReplay,
    feature: &str,
    subfeature: Option<&str>,
) -> Result<FeatureQuery> {
    let feature_c = c_string(feature, "--feature")?;
    let subfeature_c = subfeature
        .map(|s| c_string(s, "--subfeature"))
        .transpose()?;

    Ok(FeatureQuery {
        feature: feature.to_string(),
        subfeature: subfeature.map(str::to_string),
        enabled: replay.is_feature_enabled(&feature_c, subfeature_c.as_deref()),
        recording_or_replaying: replay
            .is_recording_or_replaying(Some(feature_c.as_c_str()), subfeature_c.as_deref()),
    })
}

fn print_text(report: &ProbeReport) {
    println!("Namespace: {}", report.namespace);
    print!("{}", report.status.render_text());
    if let Some(query) = &report.query {
        let target = match &query.subfeature {
            Some(sub) => format!("{}/{}", query.feature, sub),
            None => query.feature.clone(),
        };
        println!("Feature {}:", target);
        println!("  enabled:                {}", query.enabled);
        println!("  recording or replaying: {}", query.recording_or_replaying);
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    let namespace = select_namespace(&args)?;
    tracing::debug!("probing record/replay backend in namespace {}", namespace);

    let replay = RecordReplay::new(ProcessBinder::new(namespace.clone()));
    let status = replay.status();

    let query = match &args.feature {
        Some(feature) => Some(query_feature(
            &replay,
            feature,
            args.subfeature.as_deref(),
        )?),
        None => None,
    };

    let report = ProbeReport {
        namespace: namespace.to_string(),
        status,
        query,
    };

    match args.format {
        OutputFormat::Text => print_text(&report),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&report)
                .context("Failed to serialize probe report")?;
            println!("{}", json);
        }
    }

    Ok(())
}

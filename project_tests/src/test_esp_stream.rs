//! # Live ESP Stream Probe
//!
//! Subscribes to one window of a running ESP server the same way the bridge
//! does and prints every trimmed batch as JSON, so a deployment can be checked
//! by hand without a viewer.
//!
//! ```text
//! cargo run -p project_tests --bin test_esp_stream -- \
//!     --server-url wss://esp.example.com:443 --project trades --cq cq1 --window src
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;

use clap::Parser;
use lib_esp::frames::{self, LiveBuffer};
use lib_esp::plugin::{DataQuery, Datasource, DatasourceJsonData, DatasourceSettings, QueryDataRequest};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// ESP server WebSocket or HTTP URL
    #[clap(long)]
    server_url: String,
    /// Project name
    #[clap(long)]
    project: String,
    /// Continuous query name
    #[clap(long)]
    cq: String,
    /// Window name
    #[clap(long)]
    window: String,
    /// Delivery interval in milliseconds
    #[clap(long, default_value_t = 1000)]
    interval: u64,
    /// Maximum events per delivery
    #[clap(long, default_value_t = 100)]
    max_events: u64,
    /// Authorization header value sent to the server
    #[clap(long, env = "ESP_AUTHORIZATION")]
    authorization: Option<String>,
    /// Stop after this many batches (0 runs until Ctrl-C)
    #[clap(long, default_value_t = 0)]
    batches: usize,
}

fn rest_url(server_url: &str) -> String {
    match server_url.split_once("://") {
        Some(("wss", rest)) => format!("https://{}", rest),
        Some(("ws", rest)) => format!("http://{}", rest),
        _ => server_url.to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("[{}][{}] {}", record.target(), record.level(), message)))
        .level(log::LevelFilter::Info)
        .chain(std::io::stderr())
        .apply()?;

    let settings = DatasourceSettings {
        uid: "probe".to_string(),
        url: rest_url(&args.server_url),
        json_data: DatasourceJsonData {
            oauth_pass_thru: args.authorization.is_some(),
            direct_to_esp: true,
            ..DatasourceJsonData::default()
        },
    };
    let datasource = Arc::new(Datasource::new(settings)?);

    let request = QueryDataRequest {
        queries: vec![DataQuery {
            ref_id: "A".to_string(),
            model: json!({
                "internalServerUrl": args.server_url,
                "projectName": args.project,
                "cqName": args.cq,
                "windowName": args.window,
                "intervalMs": args.interval,
                "maxDataPoints": args.max_events,
            }),
        }],
        authorization: args.authorization.clone(),
    };
    let response = datasource.query_data(&request).await;
    let answer = response
        .responses
        .get("A")
        .ok_or_else(|| anyhow::anyhow!("no response for query"))?;
    if let Some(error) = &answer.error {
        anyhow::bail!("query rejected: {}", error);
    }
    let channel = answer
        .frames
        .first()
        .and_then(|f| f.meta.as_ref())
        .and_then(|m| m.channel.clone())
        .ok_or_else(|| anyhow::anyhow!("query answered without a channel"))?;
    let path = channel.splitn(3, '/').nth(2).unwrap_or_default().to_string();
    println!("--- Streaming {} ---", channel);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let stream = {
        let datasource = datasource.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { datasource.run_stream(&path, &tx, cancel).await })
    };

    let mut buffer = LiveBuffer::default();
    let mut printed = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                buffer.push(frame);
                let batch = frames::process(buffer.snapshot());
                println!("{}", serde_json::to_string(&batch)?);
                printed += 1;
                if args.batches > 0 && printed >= args.batches {
                    break;
                }
            }
        }
    }

    cancel.cancel();
    match stream.await? {
        Ok(()) => println!("--- Stream closed after {} batches ---", printed),
        Err(e) => println!("--- Stream failed after {} batches: {} ---", printed, e),
    }
    Ok(())
}

//! signalr-tail - print what a SignalR hub pushes.
//!
//! Starts one hub session, subscribes to the requested events, performs the
//! requested invocations and prints everything until the session ends or
//! Ctrl-C closes it.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::Value;
use signalr_async::{
    blocking, decode_payload, Arguments, ClientConfig, ClientError, Envelope, HubClient,
    InvocationError, SessionState,
};

// CLI
#[derive(Parser, Debug)]
#[command(name = "signalr-tail")]
#[command(version)]
#[command(about = "Tail events from a SignalR hub")]
struct Cli {
    /// Server base address (http, https, ws or wss)
    #[arg(long)]
    address: Option<String>,

    /// Hub name
    #[arg(long)]
    hub: Option<String>,

    /// JSON configuration file
    #[arg(long, env = "SIGNALR_CONFIG")]
    config: Option<PathBuf>,

    /// Connect straight to the address without the negotiate request
    #[arg(long)]
    direct: bool,

    /// Hub event to print (repeatable)
    #[arg(long = "subscribe", value_name = "EVENT")]
    subscribe: Vec<String>,

    /// Hub method to call after connecting, as METHOD[:ARG,ARG..] (repeatable)
    #[arg(long = "invoke", value_name = "CALL")]
    invoke: Vec<String>,

    /// Decode base64+deflate payloads before printing
    #[arg(long)]
    decode: bool,

    /// Print every inbound envelope
    #[arg(long)]
    raw: bool,
}

impl Cli {
    /// File, then environment, then flags.
    fn client_config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig::load(self.config.as_deref())?;
        if let Some(address) = &self.address {
            config.address.clone_from(address);
        }
        if let Some(hub) = &self.hub {
            config.hub.clone_from(hub);
        }
        if self.direct {
            config.negotiate = false;
        }

        if config.address.is_empty() {
            bail!("no hub address given (use --address or SIGNALR_ADDRESS)");
        }
        if config.hub.is_empty() {
            bail!("no hub name given (use --hub or SIGNALR_HUB)");
        }
        Ok(config)
    }
}

/// Split `METHOD[:ARG,ARG..]` into a method name and its arguments.
///
/// Each argument is parsed as JSON when possible, otherwise sent as a string.
/// Commas inside JSON arrays, objects and strings do not split arguments.
fn parse_invocation(call: &str) -> (String, Arguments) {
    let Some((method, args)) = call.split_once(':') else {
        return (call.to_string(), Vec::new());
    };
    let args = split_top_level(args)
        .into_iter()
        .filter(|arg| !arg.is_empty())
        .map(|arg| serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.to_string())))
        .collect();
    (method.to_string(), args)
}

/// Split on commas that are not nested in brackets, braces or quotes.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => in_string = false,
                _ => escaped = false,
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Replace string values that decode as compressed payloads.
fn maybe_decode(value: &Value, decode: bool) -> Value {
    match value {
        Value::String(text) if decode => decode_payload(text).unwrap_or_else(|e| {
            log::debug!("[signalr-tail] Argument left as text: {e}");
            value.clone()
        }),
        _ => value.clone(),
    }
}

fn render(args: &Arguments, decode: bool) -> String {
    Value::Array(args.iter().map(|arg| maybe_decode(arg, decode)).collect()).to_string()
}

fn register_printers(client: &HubClient, cli: &Cli) {
    for event in &cli.subscribe {
        let name = event.clone();
        let decode = cli.decode;
        client.subscribe(
            event,
            blocking(move |args: &Arguments| {
                println!("{name} {}", render(args, decode));
                Ok(())
            }),
        );
    }

    client.errors().register(blocking(|error: &InvocationError| {
        match &error.call_arguments {
            Some(call) => eprintln!("error from {}.{}: {}", call.hub_name, call.method, error.error),
            None => eprintln!("error: {}", error.error),
        }
        Ok(())
    }));

    if cli.raw {
        let decode = cli.decode;
        client.received().register(blocking(move |envelope: &Envelope| {
            println!("{}", serde_json::to_string(envelope)?);
            if decode {
                if let Some(text) = envelope.compressed_result() {
                    match decode_payload(text) {
                        Ok(value) => println!("R {value}"),
                        Err(e) => log::warn!("[signalr-tail] Undecodable result: {e}"),
                    }
                }
            }
            Ok(())
        }));
    }

    client.exceptions().register(blocking(|error: &ClientError| {
        eprintln!("session failed: {error}");
        Ok(())
    }));
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let config = cli.client_config()?;
    log::info!(
        "[signalr-tail] Connecting to hub '{}' at {}",
        config.hub,
        config.address
    );

    let client = HubClient::from_config(config).build();
    register_printers(&client, &cli);
    log::info!(
        "[signalr-tail] Subscribed to {:?}",
        client.subscribed_events()
    );

    client.start().await.context("failed to start hub session")?;

    for call in &cli.invoke {
        let (method, args) = parse_invocation(call);
        match client.invoke(&method, args) {
            Ok(id) => log::info!("[signalr-tail] Invoked {method} as #{id}"),
            // The session may already have ended; its final state decides the exit.
            Err(e) if !e.is_fatal() => {
                log::warn!("[signalr-tail] Skipping {method}: {e}");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let state = tokio::select! {
        state = client.run_forever() => state,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            log::info!("[signalr-tail] Interrupted, closing session");
            client.close();
            client.run_forever().await
        }
    };

    log::info!("[signalr-tail] Session ended: {state:?}");
    if state == SessionState::Faulted {
        bail!("session faulted");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_invocation_without_arguments() {
        assert_eq!(parse_invocation("QueryExchangeState"), ("QueryExchangeState".to_string(), vec![]));
        assert_eq!(parse_invocation("Ping:"), ("Ping".to_string(), vec![]));
    }

    #[test]
    fn test_parse_invocation_mixes_json_and_text() {
        let (method, args) = parse_invocation("Subscribe:BTC-ETH,5,true");
        assert_eq!(method, "Subscribe");
        assert_eq!(args, vec![json!("BTC-ETH"), json!(5), json!(true)]);
    }

    #[test]
    fn test_parse_invocation_keeps_nested_commas() {
        let (method, args) = parse_invocation(r#"Query:[1,2],{"a":1,"b":[3,4]},"x,y",plain"#);
        assert_eq!(method, "Query");
        assert_eq!(
            args,
            vec![json!([1, 2]), json!({"a": 1, "b": [3, 4]}), json!("x,y"), json!("plain")]
        );
    }

    #[test]
    fn test_split_top_level_handles_escaped_quotes() {
        assert_eq!(
            split_top_level(r#""a\",b",c"#),
            vec![r#""a\",b""#, "c"]
        );
    }

    #[test]
    fn test_render_leaves_plain_text_when_not_decoding() {
        let args = vec![json!("abc"), json!(1)];
        assert_eq!(render(&args, false), r#"["abc",1]"#);
        assert_eq!(render(&args, true), r#"["abc",1]"#);
    }

    #[test]
    fn test_cli_flags_override_config() {
        let cli = Cli::parse_from([
            "signalr-tail",
            "--address",
            "https://socket.example.com/signalr",
            "--hub",
            "c2",
            "--direct",
            "--subscribe",
            "uE",
            "--invoke",
            "Subscribe:BTC-ETH",
        ]);

        let config = cli.client_config().unwrap();

        assert_eq!(config.address, "https://socket.example.com/signalr");
        assert_eq!(config.hub, "c2");
        assert!(!config.negotiate);
        assert_eq!(cli.subscribe, vec!["uE"]);
        assert_eq!(cli.invoke, vec!["Subscribe:BTC-ETH"]);
    }
}

//! xcall-probe: query and drive configured xCall chains from the command line.
//!
//! Reads the same TOML file as the harness. `height` and `find` are
//! read-only; `send` runs a full delivery and needs a source chain whose
//! client can sign (a node-managed EVM account).

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use xcall_correlation::{
    build_chain, ChainConfig, CorrelationContext, EventKind, EventMatcher, HarnessConfig,
    NetworkAddress, Payload, RequestId, SerialNo, SignerKey, XCallChain, XCallOrchestrator,
    DAPP,
};
use xcall_telemetry::{init_telemetry, TelemetryConfig};

/// xcall-probe: xCall correlation from the command line
#[derive(Parser, Debug)]
#[command(name = "xcall-probe")]
#[command(about = "Query heights, correlate events and run xCall round trips")]
struct Args {
    /// Harness configuration file
    #[arg(short, long, default_value = "xcall.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the latest height of a chain
    Height {
        /// Chain NID
        chain: String,
    },

    /// Wait for one xCall event on a chain
    Find {
        /// Chain NID
        chain: String,

        /// Event name (CallMessage, CallExecuted, ResponseMessage, ...)
        #[arg(short, long, value_parser = parse_kind)]
        kind: EventKind,

        /// Serial number to match
        #[arg(long)]
        sn: Option<String>,

        /// Request id to match (CallExecuted)
        #[arg(long)]
        req_id: Option<String>,

        /// Lowest height to scan (defaults to the current head)
        #[arg(long)]
        from_height: Option<u64>,

        /// Seconds to wait before giving up
        #[arg(short, long, default_value = "60")]
        timeout: u64,
    },

    /// Send a payload and correlate its delivery
    Send {
        /// Source chain NID
        source: String,

        /// Destination chain NID
        target: String,

        /// Payload text
        #[arg(short, long)]
        data: String,

        /// Rollback payload text; runs execution and rollback settlement too
        #[arg(short, long)]
        rollback: Option<String>,

        /// Seconds to wait for the whole flow
        #[arg(short, long, default_value = "300")]
        timeout: u64,
    },
}

fn parse_kind(name: &str) -> std::result::Result<EventKind, String> {
    EventKind::from_signature(name).ok_or_else(|| {
        let known: Vec<_> = EventKind::ALL.iter().map(|k| k.signature()).collect();
        format!("unknown event {} (expected one of {})", name, known.join(", "))
    })
}

fn chain_config<'a>(config: &'a HarnessConfig, nid: &str) -> Result<&'a ChainConfig> {
    config
        .chain(nid)
        .ok_or_else(|| anyhow!("chain {} is not configured", nid))
}

fn connect(config: &HarnessConfig, nid: &str) -> Result<std::sync::Arc<dyn XCallChain>> {
    let chain = chain_config(config, nid)?;
    Ok(build_chain(chain, config.settings_for(chain), None)?)
}

fn signer_for(chain: &ChainConfig) -> Result<SignerKey> {
    chain
        .signer
        .as_deref()
        .map(SignerKey::new)
        .with_context(|| format!("chain {} has no signer configured", chain.nid))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _telemetry = init_telemetry(TelemetryConfig::for_tool("probe"))?;
    let config = HarnessConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config))?;

    match args.command {
        Command::Height { chain } => {
            let height = connect(&config, &chain)?.height().await?;
            println!("{}", json!({ "chain": chain, "height": height }));
        }

        Command::Find {
            chain,
            kind,
            sn,
            req_id,
            from_height,
            timeout,
        } => {
            let matcher = match (sn, req_id) {
                (Some(sn), None) => EventMatcher::by_sn(SerialNo::from_dec_str(&sn)?),
                (None, Some(req_id)) => EventMatcher::by_req_id(RequestId::from_dec_str(&req_id)?),
                _ => bail!("pass exactly one of --sn or --req-id"),
            };
            let client = connect(&config, &chain)?;
            let start = match from_height {
                Some(height) => height,
                None => client.height().await?,
            };
            info!(chain = %chain, signature = %kind, key = %matcher.key(), start, "Waiting for event");
            let ctx = CorrelationContext::with_timeout(Duration::from_secs(timeout));
            let observed = client.wait_for(&ctx, kind, start, matcher).await?;
            println!(
                "{}",
                json!({
                    "chain": chain,
                    "signature": kind.signature(),
                    "height": observed.height,
                    "tx": observed.tx_id,
                    "sn": observed.event.sn().map(|sn| sn.to_string()),
                    "req_id": observed.event.req_id().map(|id| id.to_string()),
                    "event": format!("{:?}", observed.event),
                })
            );
        }

        Command::Send {
            source,
            target,
            data,
            rollback,
            timeout,
        } => {
            let source_config = chain_config(&config, &source)?;
            let signer = signer_for(source_config)?;
            let source_chain = connect(&config, &source)?;
            let target_chain = connect(&config, &target)?;
            let to = NetworkAddress::new(
                target_chain.nid().clone(),
                target_chain.get_contract_address(DAPP)?,
            );
            let ctx = CorrelationContext::with_timeout(Duration::from_secs(timeout));
            let orchestrator = XCallOrchestrator::new();
            let data = Payload::from(data.as_str());

            match rollback {
                None => {
                    let response = orchestrator
                        .xcall(&ctx, source_chain.as_ref(), target_chain.as_ref(), &signer, &to, &data, None)
                        .await?;
                    println!("{}", serde_json::to_string(&response)?);
                }
                Some(rollback) => {
                    let target_config = chain_config(&config, &target)?;
                    let target_signer = signer_for(target_config)?;
                    let source_start = source_chain.height().await?;
                    let response = orchestrator
                        .xcall(
                            &ctx,
                            source_chain.as_ref(),
                            target_chain.as_ref(),
                            &signer,
                            &to,
                            &data,
                            Some(&Payload::from(rollback.as_str())),
                        )
                        .await?;
                    let executed = orchestrator
                        .execute_call(&ctx, target_chain.as_ref(), &target_signer, &response)
                        .await?;
                    let outcome = orchestrator
                        .rollback(&ctx, source_chain.as_ref(), &signer, response.serial_no, source_start)
                        .await?;
                    println!(
                        "{}",
                        json!({
                            "response": response,
                            "executed": { "req_id": executed.req_id.to_string(), "code": executed.code.0, "msg": executed.msg },
                            "rollback": format!("{:?}", outcome),
                        })
                    );
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("CallMessage").unwrap(), EventKind::CallMessage);
        assert!(parse_kind("Transfer").unwrap_err().contains("RollbackExecuted"));
    }

    #[test]
    fn test_find_args() {
        let args = Args::try_parse_from([
            "xcall-probe", "find", "0x2.icon", "--kind", "ResponseMessage", "--sn", "7",
        ])
        .unwrap();
        match args.command {
            Command::Find { chain, kind, sn, .. } => {
                assert_eq!(chain, "0x2.icon");
                assert_eq!(kind, EventKind::ResponseMessage);
                assert_eq!(sn.as_deref(), Some("7"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_signer_is_reported() {
        let config = HarnessConfig::parse(
            r#"
[[chains]]
kind = "evm"
nid = "0x2.eth"
rpc_url = "http://localhost:8545"
[chains.contracts]
xcall = "0x01"
"#,
        )
        .unwrap();
        let chain = chain_config(&config, "0x2.eth").unwrap();
        assert!(signer_for(chain).is_err());
        assert!(chain_config(&config, "nowhere").is_err());
    }
}

//! Turns the flat CLI surface into running inputs/outputs and an
//! [`sidecast_emitter::Emitter`]. Validation happens here, once, up
//! front, rather than failing mid-pipeline.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sidecast_core::{Input, LimitedOutput, LimiterSpec, Output};
use sidecast_emitter::{BroadcastPolicy, Emitter};
use sidecast_io::{object_store::ObjectStore, DummyInput, FileInput, FileInputConfig, FileOutput, HttpInput, NullOutput, StdoutOutput, TcpInput, TcpOutput};
use sidecast_net::{HttpOutput, HttpOutputConfig, HttpOutputHandle, KafkaFormat, KafkaInput, KafkaInputConfig, KafkaOutput, KafkaOutputConfig, WorkerCount};

use crate::cli::Cli;
use crate::modifiers;

const INPUT_CHANNEL_CAPACITY: usize = 1000;
const KAFKA_GROUP_ID: &str = "sidecast";

/// `host|topic[|json]`, shared by `--input-kafka` and `--output-kafka`.
fn parse_kafka_spec(spec: &str, flag: &str) -> Result<(String, String, KafkaFormat)> {
    let mut parts = spec.split('|');
    let brokers = parts.next().filter(|s| !s.is_empty()).with_context(|| format!("{flag} expects HOST|TOPIC[|json]"))?;
    let topic = parts.next().filter(|s| !s.is_empty()).with_context(|| format!("{flag} expects HOST|TOPIC[|json]"))?;
    let format = match parts.next() {
        Some("json") => KafkaFormat::Json,
        None => KafkaFormat::Binary,
        Some(other) => bail!("{flag} unknown format {other:?}, expected `json` or omitted"),
    };
    Ok((brokers.to_string(), topic.to_string(), format))
}

/// `url[|N]` or `url[|N%]`, used by `--output-http`.
fn parse_http_output_spec(spec: &str) -> Result<(String, Option<LimiterSpec>)> {
    match spec.split_once('|') {
        Some((url, limiter)) => {
            let spec: LimiterSpec = limiter.parse().with_context(|| format!("invalid limiter in --output-http {spec:?}"))?;
            Ok((url.to_string(), Some(spec)))
        }
        None => Ok((spec.to_string(), None)),
    }
}

/// Assembles every configured input, honoring the spec's "at least one
/// input and one output" requirement by returning an error on an empty
/// list; the caller decides what that error means.
pub async fn build_inputs(cli: &Cli, object_store: Option<Arc<dyn ObjectStore>>) -> Result<Vec<Box<dyn Input>>> {
    let mut inputs: Vec<Box<dyn Input>> = Vec::new();

    for pattern in &cli.input_file {
        let config = FileInputConfig {
            pattern: pattern.clone(),
            looped: cli.input_file_loop,
            speed_factor: cli.input_file_speed,
        };
        let file_input = FileInput::open(config, object_store.clone())
            .await
            .with_context(|| format!("opening --input-file {pattern:?}"))?;
        inputs.push(Box::new(file_input));
    }

    if let Some(addr) = &cli.input_http {
        let addr: SocketAddr = addr.parse().with_context(|| format!("invalid --input-http address {addr:?}"))?;
        let http_input = HttpInput::bind(addr, INPUT_CHANNEL_CAPACITY).await.with_context(|| format!("binding --input-http {addr}"))?;
        inputs.push(Box::new(http_input));
    }

    if let Some(addr) = &cli.input_raw {
        let reassembler_config = build_reassembler_config(addr)?;
        let raw_input = sidecast_capture::RawCaptureInput::start(reassembler_config).with_context(|| format!("starting --input-raw {addr:?}"))?;
        inputs.push(Box::new(raw_input));
    }

    if let Some(addr) = &cli.input_tcp {
        let addr: SocketAddr = addr.parse().with_context(|| format!("invalid --input-tcp address {addr:?}"))?;
        let tcp_input = TcpInput::bind(addr, INPUT_CHANNEL_CAPACITY).await.with_context(|| format!("binding --input-tcp {addr}"))?;
        inputs.push(Box::new(tcp_input));
    }

    if cli.input_dummy {
        inputs.push(Box::new(DummyInput::new()));
    }

    if let Some(spec) = &cli.input_kafka {
        let (brokers, topic, format) = parse_kafka_spec(spec, "--input-kafka")?;
        let kafka_input = KafkaInput::new(KafkaInputConfig {
            brokers,
            topic,
            group_id: KAFKA_GROUP_ID.to_string(),
            format,
        })
        .context("starting --input-kafka")?;
        inputs.push(Box::new(kafka_input));
    }

    Ok(inputs)
}

fn build_reassembler_config(addr: &str) -> Result<sidecast_capture::ReassemblerConfig> {
    let (device, port) = match addr.split_once(':') {
        Some((device, port)) => (Some(device.to_string()), port),
        None => (None, addr.as_str()),
    };
    let port: u16 = port.parse().with_context(|| format!("invalid --input-raw port in {addr:?}"))?;
    Ok(sidecast_capture::ReassemblerConfig {
        device,
        port,
        ..Default::default()
    })
}

/// Assembles every configured output, wrapping HTTP outputs in the
/// shared modifier chain and any output in a [`LimitedOutput`] when a
/// `|N` or `|N%` suffix was given. Also returns a stats handle per
/// `--output-http` target, captured before the output is boxed, so
/// `--stats` reporting can read live queue depth/active worker counts
/// without needing a way back into the boxed trait object.
pub async fn build_outputs(cli: &Cli) -> Result<(Vec<Box<dyn Output>>, Vec<HttpOutputHandle>)> {
    let mut outputs: Vec<Box<dyn Output>> = Vec::new();
    let mut http_handles = Vec::new();
    let chain = modifiers::build_chain(cli)?;

    for spec in &cli.output_http {
        let (target, limiter) = parse_http_output_spec(spec)?;
        let header_overrides = cli
            .output_http_header
            .iter()
            .map(|h| {
                h.split_once(':')
                    .map(|(n, v)| (n.to_string(), v.to_string()))
                    .with_context(|| format!("--output-http-header expects NAME:VALUE, got {h:?}"))
            })
            .collect::<Result<Vec<_>>>()?;
        let workers = match cli.output_http_workers {
            n if n < 0 => WorkerCount::Elastic,
            n => WorkerCount::Fixed(n as usize),
        };
        let config = HttpOutputConfig {
            target: target.clone(),
            host_override: cli.output_http_host.clone(),
            header_overrides,
            timeout: Duration::from_secs(cli.output_http_timeout_secs),
            modifier: chain.clone(),
            workers,
            ..Default::default()
        };
        let http_output = HttpOutput::new(config).with_context(|| format!("starting --output-http {target:?}"))?;
        http_handles.push(http_output.stats_handle());
        outputs.push(wrap_output(Box::new(http_output), limiter));
    }

    for template in &cli.output_file {
        outputs.push(Box::new(FileOutput::new(template.clone(), Duration::from_secs(1))));
    }

    for addr in &cli.output_tcp {
        outputs.push(Box::new(TcpOutput::new(addr.clone())));
    }

    if cli.output_stdout {
        outputs.push(Box::new(StdoutOutput));
    }

    if cli.output_null {
        outputs.push(Box::new(NullOutput));
    }

    if let Some(spec) = &cli.output_kafka {
        let (brokers, topic, format) = parse_kafka_spec(spec, "--output-kafka")?;
        let kafka_output = KafkaOutput::new(KafkaOutputConfig { brokers, topic, format }).context("starting --output-kafka")?;
        outputs.push(Box::new(kafka_output));
    }

    Ok((outputs, http_handles))
}

fn wrap_output(output: Box<dyn Output>, limiter: Option<LimiterSpec>) -> Box<dyn Output> {
    match limiter {
        Some(spec) => Box::new(LimitedOutput::new(output, spec)),
        None => output,
    }
}

pub fn broadcast_policy(cli: &Cli) -> BroadcastPolicy {
    if cli.split_output {
        BroadcastPolicy::SplitOutput
    } else {
        BroadcastPolicy::FanOutToAll
    }
}

/// Validates the assembled pipeline has at least one input and output,
/// then hands ownership to a fresh [`Emitter`].
pub fn build_emitter(cli: &Cli, inputs: Vec<Box<dyn Input>>, outputs: Vec<Box<dyn Output>>) -> Result<Emitter> {
    if inputs.is_empty() {
        bail!("at least 1 input and 1 output required: no input configured, pass one of --input-raw, --input-file, --input-http, --input-tcp, --input-dummy, --input-kafka");
    }
    if outputs.is_empty() {
        bail!("at least 1 input and 1 output required: no output configured, pass one of --output-http, --output-file, --output-tcp, --output-stdout, --output-null, --output-kafka");
    }
    Ok(Emitter::new(inputs, outputs, cli.middleware.clone(), broadcast_policy(cli)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn kafka_spec_defaults_to_binary_format() {
        let (brokers, topic, format) = parse_kafka_spec("localhost:9092|events", "--input-kafka").unwrap();
        assert_eq!(brokers, "localhost:9092");
        assert_eq!(topic, "events");
        assert_eq!(format, KafkaFormat::Binary);
    }

    #[test]
    fn kafka_spec_honors_json_suffix() {
        let (_, _, format) = parse_kafka_spec("localhost:9092|events|json", "--input-kafka").unwrap();
        assert_eq!(format, KafkaFormat::Json);
    }

    #[test]
    fn kafka_spec_rejects_missing_topic() {
        assert!(parse_kafka_spec("localhost:9092", "--input-kafka").is_err());
    }

    #[test]
    fn kafka_spec_rejects_unknown_format() {
        assert!(parse_kafka_spec("localhost:9092|events|xml", "--input-kafka").is_err());
    }

    #[test]
    fn http_output_spec_without_limiter() {
        let (url, limiter) = parse_http_output_spec("http://localhost:8080").unwrap();
        assert_eq!(url, "http://localhost:8080");
        assert!(limiter.is_none());
    }

    #[test]
    fn http_output_spec_with_percentage_limiter() {
        let (url, limiter) = parse_http_output_spec("http://localhost:8080|50%").unwrap();
        assert_eq!(url, "http://localhost:8080");
        assert_eq!(limiter, Some(LimiterSpec::Percentage(50)));
    }

    #[test]
    fn build_emitter_rejects_empty_inputs_or_outputs() {
        let cli = Cli::parse_from(["sidecast"]);
        let err = build_emitter(&cli, Vec::new(), Vec::new()).unwrap_err();
        assert!(err.to_string().contains("at least 1 input and 1 output"));
    }
}

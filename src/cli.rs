//! Flat CLI flag surface. See spec section 6 and SPEC_FULL section 11.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sidecast", about = "Shadow-traffic capture and replay pipeline", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Capture live traffic via a raw-packet sniffer bound to `addr:port`.
    #[arg(long = "input-raw", value_name = "ADDR:PORT")]
    pub input_raw: Option<String>,

    /// Replay frames from a `.gor` file glob (repeatable, merged by timestamp).
    #[arg(long = "input-file", value_name = "PATTERN")]
    pub input_file: Vec<String>,

    /// Loop file input(s) once every file in the pool reaches EOF.
    #[arg(long = "input-file-loop")]
    pub input_file_loop: bool,

    /// Replay speed multiplier for file input (2.0 = twice as fast).
    #[arg(long = "input-file-speed", default_value_t = 1.0)]
    pub input_file_speed: f64,

    /// Accept live HTTP requests on `addr` as a capture surface.
    #[arg(long = "input-http", value_name = "ADDR")]
    pub input_http: Option<String>,

    /// Accept framed messages over a raw TCP listener on `addr`.
    #[arg(long = "input-tcp", value_name = "ADDR")]
    pub input_tcp: Option<String>,

    /// Synthetic input emitting one request per second; useful for smoke tests.
    #[arg(long = "input-dummy")]
    pub input_dummy: bool,

    /// Consume a Kafka topic as an input: `host|topic[|json]`.
    #[arg(long = "input-kafka", value_name = "HOST|TOPIC[|json]")]
    pub input_kafka: Option<String>,

    /// Dispatch to an HTTP target, optionally rate-limited: `url[|N]` (repeatable).
    #[arg(long = "output-http", value_name = "URL[|N]")]
    pub output_http: Vec<String>,

    /// Write frames to a path template (repeatable); supports `%Y %m %d %H %M %S %NS`.
    #[arg(long = "output-file", value_name = "TEMPLATE")]
    pub output_file: Vec<String>,

    /// Stream frames to a persistent TCP connection (repeatable).
    #[arg(long = "output-tcp", value_name = "ADDR")]
    pub output_tcp: Vec<String>,

    /// Write encoded frames to stdout.
    #[arg(long = "output-stdout")]
    pub output_stdout: bool,

    /// Discard every message; useful for load-testing upstream stages.
    #[arg(long = "output-null")]
    pub output_null: bool,

    /// Produce to a Kafka topic: `host|topic[|json]`.
    #[arg(long = "output-kafka", value_name = "HOST|TOPIC[|json]")]
    pub output_kafka: Option<String>,

    /// Number of HTTP output workers; `-1` for elastic scaling.
    #[arg(long = "output-http-workers", default_value_t = 1)]
    pub output_http_workers: i64,

    /// Override the `Host` header sent to `--output-http` targets.
    #[arg(long = "output-http-host")]
    pub output_http_host: Option<String>,

    /// Unconditional `Name:Value` header set on every dispatched request (repeatable).
    #[arg(long = "output-http-header", value_name = "NAME:VALUE")]
    pub output_http_header: Vec<String>,

    /// Per-request dispatch timeout in seconds.
    #[arg(long = "output-http-timeout", default_value_t = 5)]
    pub output_http_timeout_secs: u64,

    /// Drop requests whose path+query does not match this regex (repeatable).
    #[arg(long = "http-allow-url")]
    pub http_allow_url: Vec<String>,

    /// Drop requests whose path+query matches this regex (repeatable).
    #[arg(long = "http-disallow-url")]
    pub http_disallow_url: Vec<String>,

    /// `pattern=>template` path rewrite with capture groups (repeatable).
    #[arg(long = "http-rewrite-url", value_name = "PATTERN=>TEMPLATE")]
    pub http_rewrite_url: Vec<String>,

    /// `Name:regex` — drop unless the named header matches (repeatable).
    #[arg(long = "http-allow-header", value_name = "NAME:REGEX")]
    pub http_allow_header: Vec<String>,

    /// `Name:regex` — drop if the named header matches (repeatable).
    #[arg(long = "http-disallow-header", value_name = "NAME:REGEX")]
    pub http_disallow_header: Vec<String>,

    /// `Name:pattern=>template` header rewrite (repeatable).
    #[arg(long = "http-rewrite-header", value_name = "NAME:PATTERN=>TEMPLATE")]
    pub http_rewrite_header: Vec<String>,

    /// `Name:value` unconditional header set (repeatable).
    #[arg(long = "http-set-header", value_name = "NAME:VALUE")]
    pub http_set_header: Vec<String>,

    /// `name:value` unconditional query-param set (repeatable).
    #[arg(long = "http-set-param", value_name = "NAME:VALUE")]
    pub http_set_param: Vec<String>,

    /// Comma-separated allowed methods, e.g. `GET,POST`.
    #[arg(long = "http-allow-method", value_name = "METHOD[,METHOD...]")]
    pub http_allow_method: Option<String>,

    /// `regex[:allow]` against decoded basic-auth credentials; default mode drops matches, `:allow` keeps only matches.
    #[arg(long = "http-basic-auth-filter", value_name = "REGEX[:allow]")]
    pub http_basic_auth_filter: Option<String>,

    /// `Name:N` deterministic percentage gate keyed by header value (repeatable).
    #[arg(long = "http-header-limiter", value_name = "NAME:N")]
    pub http_header_limiter: Vec<String>,

    /// `name:N` deterministic percentage gate keyed by query-param value (repeatable).
    #[arg(long = "http-param-limiter", value_name = "NAME:N")]
    pub http_param_limiter: Vec<String>,

    /// Pipe every message through this external command before dispatch.
    #[arg(long = "middleware", value_name = "CMD")]
    pub middleware: Option<String>,

    /// Shut down after this long, e.g. `30s`, `5m`.
    #[arg(long = "exit-after", value_name = "DURATION")]
    pub exit_after: Option<String>,

    /// Emit periodic queue-depth/worker/rate stats lines on stderr.
    #[arg(long = "stats")]
    pub stats: bool,

    /// Round-robin across outputs instead of fanning out to all of them.
    #[arg(long = "split-output")]
    pub split_output: bool,

    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    #[arg(long = "debug")]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Runs a diagnostic static file server, logging each served path at debug level.
    FileServer {
        #[arg(value_name = "ADDR")]
        addr: String,
    },
}

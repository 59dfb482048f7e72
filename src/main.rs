//! Facegate CLI
//!
//! Usage:
//!   facegate --script demos/face_ready.json        # Replay a scripted device
//!   facegate --interactive --kind location         # Type device events at a prompt
//!   facegate --serve --verify-url http://...       # HTTP API server
//!   facegate --script s.json --json                # JSON output

use clap::{Parser, ValueEnum};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use facegate::core::{
    run_server, CapabilityConfig, DeviceCommand, DeviceFeed, HttpVerifier, RemoteVerifier, Script,
    SessionConfig, SessionHandle, VerificationObserver, VerificationSession,
};
use facegate::types::{
    FallbackPolicy, SessionFailure, SessionReport, SessionState, StatusOutput, StatusSnapshot,
    VerificationKind, Verified, VerifyError,
};
use facegate::VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Face,
    Location,
}

impl From<KindArg> for VerificationKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Face => VerificationKind::Face,
            KindArg::Location => VerificationKind::Location,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "facegate",
    version = VERSION,
    about = "Facegate - face and location verification that never blocks onboarding",
    long_about = "Facegate orchestrates a face or location verification step.\n\n\
                  A ready signal must hold for the dwell time before verification fires;\n\
                  if that never happens, the fallback path completes the step anyway.\n\n\
                  Modes:\n  \
                  --script       Replay a scripted device (JSON)\n  \
                  --interactive  Type device events at a prompt\n  \
                  --serve        HTTP API server mode\n\n\
                  States:\n  \
                  ACQUIRING       - Waiting for a ready signal\n  \
                  STABILIZING     - Ready, dwell timer running\n  \
                  VERIFYING       - Fired, verification in progress\n  \
                  RESOLVED        - Verified (onVerified sent)\n  \
                  FAILED_FALLBACK - Strict mode only"
)]
struct Args {
    /// Verification variant
    #[arg(short, long, value_enum)]
    kind: Option<KindArg>,

    /// Replay a scripted device from a JSON file
    #[arg(long)]
    script: Option<String>,

    /// Interactive mode - read device commands from stdin
    #[arg(short, long)]
    interactive: bool,

    /// Run as HTTP API server
    #[arg(short, long)]
    serve: bool,

    /// Server address (default: 127.0.0.1:3000)
    #[arg(long, default_value = "127.0.0.1:3000")]
    addr: String,

    /// Remote verify backend; verification is local without it
    #[arg(long)]
    verify_url: Option<String>,

    /// Policy file (JSON); flags below override it
    #[arg(long)]
    policy: Option<String>,

    /// Dwell time before promotion (milliseconds)
    #[arg(long)]
    dwell_ms: Option<u64>,

    /// Total timeout before the fallback engages (milliseconds)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Grace delay before the fallback fires (milliseconds)
    #[arg(long)]
    fallback_delay_ms: Option<u64>,

    /// Denied or missing hardware engages the fallback immediately
    #[arg(long)]
    sample_mode: bool,

    /// Fallback ends in failure instead of success
    #[arg(long)]
    strict: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Disable colors in output
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_ansi(!args.no_color)
        .init();

    let verifier = match build_verifier(&args) {
        Ok(verifier) => verifier,
        Err(e) => fail(&format!("Verifier error: {}", e)),
    };

    if args.serve {
        run_serve(&args, verifier).await;
    } else if let Some(ref path) = args.script {
        run_script(path, &args, verifier).await;
    } else if args.interactive {
        run_interactive(&args, verifier).await;
    } else {
        // Default to interactive if no mode specified
        run_interactive(&args, verifier).await;
    }
}

fn fail(message: &str) -> ! {
    eprintln!("{}", message);
    std::process::exit(1);
}

fn build_verifier(args: &Args) -> Result<Option<Arc<dyn RemoteVerifier>>, VerifyError> {
    match &args.verify_url {
        Some(url) => {
            let verifier: Arc<dyn RemoteVerifier> = Arc::new(HttpVerifier::new(url.clone())?);
            Ok(Some(verifier))
        }
        None => Ok(None),
    }
}

/// Policy file or variant defaults, then flag overrides
fn build_policy(kind: VerificationKind, args: &Args) -> FallbackPolicy {
    let mut policy = match &args.policy {
        Some(path) => match FallbackPolicy::from_file(path, kind) {
            Ok(policy) => policy,
            Err(e) => fail(&format!("Policy error: {}", e)),
        },
        None => FallbackPolicy::for_kind(kind),
    };
    if let Some(dwell_ms) = args.dwell_ms {
        policy.dwell_ms = dwell_ms;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        policy.total_timeout_ms = timeout_ms;
    }
    if let Some(delay_ms) = args.fallback_delay_ms {
        policy.fallback_delay_ms = delay_ms;
    }
    policy.sample_mode_enabled |= args.sample_mode;
    policy.strict_mode |= args.strict;
    policy
}

fn spawn_session(
    kind: VerificationKind,
    capability: CapabilityConfig,
    args: &Args,
    verifier: Option<Arc<dyn RemoteVerifier>>,
) -> (SessionHandle, Option<DeviceFeed>) {
    let (capability, feed) = match capability.build(kind) {
        Ok(built) => built,
        Err(e) => fail(&format!("Capability error: {}", e)),
    };
    let observer = Arc::new(TerminalObserver::new(args.json, args.no_color));
    let mut config = SessionConfig::new(capability, observer).with_policy(build_policy(kind, args));
    if let Some(verifier) = verifier {
        config = config.with_verifier(verifier);
    }
    match VerificationSession::spawn(config) {
        Ok(handle) => (handle, feed),
        Err(e) => fail(&format!("Policy error: {}", e)),
    }
}

/// Replay a scripted device until the session ends
async fn run_script(path: &str, args: &Args, verifier: Option<Arc<dyn RemoteVerifier>>) {
    let script = match Script::from_file(path) {
        Ok(script) => script,
        Err(e) => fail(&format!("Script error: {}", e)),
    };
    let kind = args.kind.map(VerificationKind::from).unwrap_or(script.kind);

    if !args.json {
        print_header(&format!("Script - {}", kind), args.no_color);
    }
    let (handle, _) = spawn_session(kind, CapabilityConfig::Scripted(script), args, verifier);
    let report = handle.wait().await;
    finish(report, args);
}

/// Interactive mode - the prompt plays the device
async fn run_interactive(args: &Args, verifier: Option<Arc<dyn RemoteVerifier>>) {
    let kind = args.kind.map(VerificationKind::from).unwrap_or(VerificationKind::Face);
    let (handle, feed) = spawn_session(kind, CapabilityConfig::Device, args, verifier);
    let Some(feed) = feed else {
        fail("Interactive mode needs a device feed");
    };

    if !args.json {
        print_header(&format!("Interactive - {}", kind), args.no_color);
        println!("Commands: allow | deny | unavailable | face N | fix LAT LON ACC | nofix | fire | status | quit");
        println!("The fallback completes the step if nothing stabilizes in time.");
        println!();
    }

    let mut state_rx = handle.subscribe_state();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        if !args.json {
            print!("{}", format_prompt(handle.state(), args.no_color));
            let _ = std::io::stdout().flush();
        }

        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = state_rx.wait_for(|state| state.is_terminal()) => break,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => {
                handle.unmount();
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match DeviceCommand::parse(&line) {
            Ok(DeviceCommand::Signal(signal)) => {
                if let Err(e) = feed.push(signal).await {
                    println!("{}", warn_line(&e.to_string(), args.no_color));
                }
            }
            Ok(DeviceCommand::Permission(answer)) => {
                if let Err(e) = feed.answer_permission(answer) {
                    println!("{}", warn_line(&e.to_string(), args.no_color));
                }
            }
            Ok(DeviceCommand::Fire) => {
                if !handle.fire() {
                    println!("{}", warn_line("session already ended", args.no_color));
                }
            }
            Ok(DeviceCommand::Status) => println!("state={}", handle.state()),
            Ok(DeviceCommand::Quit) => {
                handle.unmount();
                break;
            }
            Err(e) => println!("{}", warn_line(&e.to_string(), args.no_color)),
        }
    }

    println!();
    let report = handle.wait().await;
    finish(report, args);
}

/// Run HTTP API server
async fn run_serve(args: &Args, verifier: Option<Arc<dyn RemoteVerifier>>) {
    println!();
    println!("╔════════════════════════════════════════════════════════╗");
    println!("║  Facegate API Server                                   ║");
    println!("║  Version: {:<45}║", VERSION);
    println!("╚════════════════════════════════════════════════════════╝");
    println!();

    if let Err(e) = run_server(&args.addr, verifier).await {
        fail(&format!("Server error: {}", e));
    }
}

/// Print the report and exit non-zero unless verified
fn finish(report: Option<SessionReport>, args: &Args) {
    let Some(report) = report else {
        fail("Session ended abnormally");
    };
    if args.json {
        println!("{}", serde_json::to_string(&report).unwrap_or_default());
    } else {
        print_summary(&report, args.no_color);
    }
    if !report.is_verified() {
        std::process::exit(1);
    }
}

/// Prints session callbacks as they happen; repeated identical ticks are skipped
struct TerminalObserver {
    json: bool,
    no_color: bool,
    last: Mutex<Option<(StatusSnapshot, SessionState)>>,
}

impl TerminalObserver {
    fn new(json: bool, no_color: bool) -> Self {
        Self {
            json,
            no_color,
            last: Mutex::new(None),
        }
    }

    fn is_repeat(&self, snapshot: &StatusSnapshot, state: SessionState) -> bool {
        let Ok(mut last) = self.last.lock() else {
            return false;
        };
        let repeat = matches!(&*last, Some((seen, seen_state)) if *seen_state == state && seen.same_judgement(snapshot));
        *last = Some((snapshot.clone(), state));
        repeat
    }
}

impl VerificationObserver for TerminalObserver {
    fn on_status_change(&self, snapshot: &StatusSnapshot, output: &StatusOutput) {
        if self.is_repeat(snapshot, output.state) {
            return;
        }
        if self.json {
            println!("{}", serde_json::to_string(output).unwrap_or_default());
        } else if self.no_color {
            println!("{}", output.to_parseable_string());
        } else {
            println!("{}", output.to_terminal_string());
        }
    }

    fn on_verified(&self, verified: &Verified) {
        if self.json {
            return;
        }
        let (green, reset) = colors("\x1b[32m", self.no_color);
        println!(
            "{}  ✓ VERIFIED via {} after {:.1}s{}",
            green,
            verified.via,
            verified.elapsed_ms as f64 / 1000.0,
            reset
        );
    }

    fn on_verify_failed(&self, error: &VerifyError) {
        if self.json {
            return;
        }
        println!("{}", warn_line(&format!("{} (continuing)", error), self.no_color));
    }

    fn on_failed(&self, failure: &SessionFailure) {
        if self.json {
            return;
        }
        let (red, reset) = colors("\x1b[31m", self.no_color);
        println!("{}  ✗ FAILED: {}{}", red, failure.cause, reset);
    }
}

fn colors(code: &'static str, no_color: bool) -> (&'static str, &'static str) {
    if no_color {
        ("", "")
    } else {
        (code, SessionState::color_reset())
    }
}

fn warn_line(message: &str, no_color: bool) -> String {
    let (yellow, reset) = colors("\x1b[33m", no_color);
    format!("{}  ⚠ {}{}", yellow, message, reset)
}

/// Print header
fn print_header(mode: &str, no_color: bool) {
    if no_color {
        println!("========================================");
        println!("  Facegate v{} - {}", VERSION, mode);
        println!("========================================");
    } else {
        println!("\x1b[1m╔════════════════════════════════════════════════════════╗\x1b[0m");
        println!("\x1b[1m║  Facegate v{} - {:<37}║\x1b[0m", VERSION, mode);
        println!("\x1b[1m╚════════════════════════════════════════════════════════╝\x1b[0m");
    }
    println!();
}

/// Format prompt
fn format_prompt(state: SessionState, no_color: bool) -> String {
    if no_color {
        format!("[{}] > ", state)
    } else {
        format!(
            "{}{} [{}]{} > ",
            state.color_code(),
            state.emoji(),
            state,
            SessionState::color_reset()
        )
    }
}

/// Print the final report
fn print_summary(report: &SessionReport, no_color: bool) {
    let (color, reset) = colors(report.final_state.color_code(), no_color);
    let ms = |v: Option<u64>| v.map(|ms| format!("{}ms", ms)).unwrap_or_else(|| "-".to_string());

    println!("{}┌───────────────────────────────────────┐{}", color, reset);
    println!("{}│ Session {}{}", color, report.session_id, reset);
    println!("{}├───────────────────────────────────────┤{}", color, reset);
    println!("{}│ Final state: {}{}", color, report.final_state, reset);
    println!(
        "{}│ Fired by:    {}{}",
        color,
        report.fired_by.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
        reset
    );
    println!("{}│ Triggered:   {}{}", color, ms(report.triggered_at_ms), reset);
    println!("{}│ Resolved:    {}{}", color, ms(report.resolved_at_ms), reset);
    if report.unmounted {
        println!("{}│ Unmounted before completion{}", color, reset);
    }
    if !report.diagnostics.is_empty() {
        println!("{}├───────────────────────────────────────┤{}", color, reset);
        for diagnostic in &report.diagnostics {
            println!("{}│ {} {}", color, diagnostic.code(), reset);
        }
    }
    println!("{}└───────────────────────────────────────┘{}", color, reset);
}

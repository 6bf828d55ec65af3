//! XSE loader binary

use clap::Parser;
use std::{env, panic, path::PathBuf, process};
use xse_loader::exit_codes::{EXIT_ERROR, EXIT_SUCCESS};
use xse_loader::launcher::{LaunchRequest, PriorityClass};
use xse_loader::{LoaderOptions, launch_runtime};

const VERSION: &str = xse_loader::version::VERSION;

#[derive(Parser, Debug)]
#[command(version = VERSION, about = "Launch the runtime with the XSE64 extension attached")]
struct Args {
    /// Launch this executable instead of the installed runtime
    #[arg(long)]
    alt_exe: Option<PathBuf>,

    /// Inject this module instead of the versioned one
    #[arg(long)]
    alt_dll: Option<PathBuf>,

    /// CPU affinity mask (decimal or 0x-prefixed hex)
    #[arg(long, value_parser = parse_affinity)]
    affinity: Option<u64>,

    /// Process priority class
    #[arg(long, value_enum)]
    priority: Option<PriorityClass>,

    /// Wait for the runtime to exit before returning
    #[arg(long)]
    wait_for_close: bool,

    /// Wait indefinitely for the module to load
    #[arg(long)]
    no_timeout: bool,

    /// Target the editor instead of the runtime
    #[arg(long)]
    editor: bool,

    /// Identify the runtime and exit without launching it
    #[arg(long)]
    identify_only: bool,

    /// Set the storefront environment so the runtime skips its launcher
    #[arg(long)]
    skip_launcher: bool,

    /// Print the launch report as JSON
    #[arg(long)]
    json: bool,

    /// Public key (PEM format) used to verify the module signature
    #[arg(long)]
    public_key: Option<PathBuf>,

    /// Configuration file (defaults to xse64_loader.json next to the loader)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, or json:<level>)
    #[arg(long)]
    log_level: Option<String>,
}

fn parse_affinity(value: &str) -> Result<u64, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse::<u64>(),
    };
    parsed.map_err(|e| format!("invalid affinity mask '{value}': {e}"))
}

fn main() {
    // Set up panic handler to return specific exit code
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("PANIC: {}", panic_info);
        process::exit(EXIT_ERROR);
    }));

    let result = panic::catch_unwind(run);

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(_) => {
            eprintln!("Fatal: Unhandled panic in loader");
            process::exit(EXIT_ERROR);
        }
    }
}

fn run() -> i32 {
    // Handle --version before clap
    if env::args().nth(1).as_deref() == Some("--version") {
        println!("xse_loader {}", xse_loader::version::full_version());
        return EXIT_SUCCESS;
    }

    let args = Args::parse();

    if let Some(ref level) = args.log_level {
        xse_loader::logger::JsonLogger::init_with_level(level);
    } else {
        xse_loader::logger::JsonLogger::init();
    }

    log::info!(
        "🧩 XSE loader: initialize (version = {}, {}, os = {})",
        xse_loader::version::full_version(),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        xse_loader::get_platform_string()
    );
    log::trace!("📋 Arguments: {:?}", args);

    let request = LaunchRequest {
        alt_exe: args.alt_exe,
        alt_dll: args.alt_dll,
        affinity: args.affinity.filter(|mask| *mask != 0),
        priority: args.priority,
        wait_for_close: args.wait_for_close,
        no_timeout: args.no_timeout,
        editor: args.editor,
        identify_only: args.identify_only,
        skip_launcher: args.skip_launcher,
        loader_exe_name: xse_loader::utils::loader_executable_name(),
    };
    let options = LoaderOptions {
        config_path: args.config,
        public_key_path: args.public_key,
        runtime_directory: None,
    };

    match launch_runtime(&request, &options) {
        Ok(report) => {
            if args.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(text) => println!("{text}"),
                    Err(e) => log::warn!("Couldn't render launch report: {}", e),
                }
            }
            log::info!("✅ Loader finished ({:?})", report.state);
            EXIT_SUCCESS
        }
        Err(e) => {
            log::error!("❌ {}", e);
            eprintln!("{e}");
            EXIT_ERROR
        }
    }
}

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod cli;
mod commands;
mod error_fmt;
mod logging;
mod rt;
mod shot;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use eyre::WrapErr;
use massdriver_config::Config;
use massdriver_core::CircuitParameters;

use crate::cli::{Cli, Commands, JSON_MODE};

fn load_config(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path).wrap_err_with(|| format!("read config {}", path.display()))?;
    let mut cfg = massdriver_config::load_toml(&text).wrap_err_with(|| format!("parse config {}", path.display()))?;
    if let Some(dir) = path.parent() {
        cfg.resolve_paths(dir);
    }
    cfg.validate()?;
    Ok(cfg)
}

fn run(cli: &Cli, cfg: Option<&Config>, shutdown: &AtomicBool) -> eyre::Result<()> {
    match &cli.cmd {
        Commands::Calibrate { target_us, reps, rt } => {
            rt::setup_rt_once(rt);
            commands::calibrate(*target_us, *reps, cli.json)
        }
        Commands::Lcr {
            inductance,
            capacitance,
            resistance,
            voltage,
            until_us,
        } => {
            let params = CircuitParameters::new(*inductance, *capacitance, *resistance, *voltage);
            commands::lcr(params, *until_us, cli.json)
        }
        Commands::Shot {
            speed,
            length_mm,
            spacing_mm,
            timeout_ms,
            rt,
        } => {
            let cfg = cfg.ok_or_else(|| eyre::eyre!("shot needs a config"))?;
            if *speed <= 0.0 || *length_mm <= 0.0 || *spacing_mm <= 0.0 {
                eyre::bail!("--speed, --length-mm and --spacing-mm must be > 0");
            }
            rt::setup_rt_once(rt);
            shot::run(
                cfg,
                *speed,
                *length_mm,
                *spacing_mm,
                Duration::from_millis(*timeout_ms),
                shutdown,
                cli.json,
            )
        }
        Commands::SelfCheck => {
            let cfg = cfg.ok_or_else(|| eyre::eyre!("self-check needs a config"))?;
            commands::self_check(cfg, cli.json)
        }
    }
}

fn report(err: &eyre::Report) -> ! {
    if JSON_MODE.get().copied().unwrap_or(false) {
        eprintln!("{}", error_fmt::format_error_json(err));
    } else {
        eprintln!("error: {}", error_fmt::humanize(err));
    }
    std::process::exit(error_fmt::exit_code_for_error(err));
}

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(e) = color_eyre::install() {
        eprintln!("color-eyre: {e}");
    }

    let needs_config = matches!(cli.cmd, Commands::Shot { .. } | Commands::SelfCheck);
    let cfg = if needs_config {
        match load_config(&cli.config) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                logging::init(cli.json, &cli.log_level, None);
                report(&e);
            }
        }
    } else {
        None
    };
    logging::init(cli.json, &cli.log_level, cfg.as_ref().map(|c| &c.logging));

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || shutdown.store(true, Ordering::Release)) {
            tracing::warn!(error = %e, "ctrl-c handler not installed");
        }
    }

    if let Err(e) = run(&cli, cfg.as_ref(), &shutdown) {
        tracing::debug!(error = ?e, "command failed");
        report(&e);
    }
}

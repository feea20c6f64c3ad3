use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use player_patcher::blueprint::{MapRef, SuitePlan};
use player_patcher::config::{load_harness_from_path, load_suite_from_path, HarnessConfig};
use player_patcher::edit::write_if_changed;
use player_patcher::env::Harness;
use player_patcher::rewrite::{apply_stubs, CallSiteRewriter, StubMode, SELF_TOKEN};
use similar::{ChangeTag, TextDiff};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "player-patcher")]
#[command(about = "Build patched private copies of competition players for testing", long_about = None)]
#[command(version)]
struct Cli {
    /// Harness settings (defaults apply if the file does not exist)
    #[arg(short, long, global = true, default_value = "player-patcher.toml")]
    config: PathBuf,

    /// Debug-level logging (PLAYER_PATCHER_LOG and RUST_LOG take precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the environments, matches and test cases a suite declares
    Plan {
        /// Suite file
        suite: PathBuf,
    },

    /// Realize and build every environment a suite declares
    Setup {
        /// Suite file
        suite: PathBuf,

        /// Directory holding one template tree per program
        #[arg(short, long)]
        template: PathBuf,

        /// Remove the private trees again after reporting
        #[arg(long)]
        teardown: bool,
    },

    /// Preview or apply call-site stubbing on a source tree
    Stub {
        /// Source tree to rewrite
        dir: PathBuf,

        /// Package the stub targets live in
        #[arg(long)]
        owner: String,

        /// Member call redirect, `source=target` (repeatable)
        #[arg(long = "member", value_name = "SRC=DST")]
        member: Vec<String>,

        /// Static call redirect, `source=target` (repeatable)
        #[arg(long = "static", value_name = "SRC=DST")]
        statics: Vec<String>,

        /// Write the changes instead of showing a diff
        #[arg(short, long)]
        write: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let harness = load_harness_from_path(&cli.config)?;

    match cli.command {
        Commands::Plan { suite } => cmd_plan(&harness, &suite),

        Commands::Setup {
            suite,
            template,
            teardown,
        } => cmd_setup(harness, &suite, template, teardown),

        Commands::Stub {
            dir,
            owner,
            member,
            statics,
            write,
        } => cmd_stub(&harness, &dir, &owner, &member, &statics, write),
    }
}

/// Log filter priority: `PLAYER_PATCHER_LOG` > `RUST_LOG` > `--verbose` > warn.
fn init_tracing(verbose: bool) {
    let filter = std::env::var("PLAYER_PATCHER_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(if verbose { "debug" } else { "warn" }));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .compact(),
        )
        .init();
}

fn cmd_plan(harness: &HarnessConfig, suite_path: &Path) -> Result<()> {
    let suite = load_suite_from_path(suite_path)?;
    let plan = suite.plan(harness)?;

    println!("{}", "Suite Plan".bold());
    println!("Suite: {}", suite_path.display());
    println!("Program: {}", suite.program);
    println!();

    print_plan(&plan);
    Ok(())
}

fn print_plan(plan: &SuitePlan) {
    for (idx, env) in plan.environments().iter().enumerate() {
        println!("{} {}", format!("env {idx}").cyan().bold(), env.name().dimmed());
        for op in env.file_ops() {
            println!("  file:  {op}");
        }
        for op in env.patch_ops() {
            println!("  patch: {op}");
        }
    }
    println!();

    for (idx, m) in plan.matches().iter().enumerate() {
        let map_kind = match m.map {
            MapRef::Named(_) => "",
            MapRef::Suite(_) => " (suite map)",
        };
        println!(
            "{} {}{} [env {}]",
            format!("match {idx}").bold(),
            m.description(),
            map_kind.dimmed(),
            m.environment.0
        );
        for test in plan.tests_for(player_patcher::MatchId(idx)) {
            println!("  - {}", test.label());
        }
    }

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} environments", format!("{}", plan.environments().len()).cyan());
    println!("  {} matches", format!("{}", plan.matches().len()).cyan());
    println!("  {} test cases", format!("{}", plan.tests().len()).cyan());
}

fn cmd_setup(
    config: HarnessConfig,
    suite_path: &Path,
    templates: PathBuf,
    teardown: bool,
) -> Result<()> {
    let suite = load_suite_from_path(suite_path)?;
    let template = suite.template(&config);
    let mut plan = suite.plan(&config)?;
    let harness = Harness::from_config(config, templates)?;

    println!("Program: {} @ {}", template.program, template.revision);
    println!();

    let mut built = 0;
    let mut failed = 0;
    for (id, result) in plan.setup_all(&harness, &template) {
        let name = plan
            .environment(id)
            .map(|env| env.name().to_string())
            .unwrap_or_default();
        match result {
            Ok(()) => {
                println!("{} env {}: built {}", "✓".green(), id.0, name.dimmed());
                built += 1;
            }
            Err(e) => {
                eprintln!("{} env {}: {} ({})", "✗".red(), id.0, e, e.classification());
                if let Some(log) = plan.environment(id).and_then(|env| env.build_log()) {
                    eprintln!("{}", "  Build log:".bold());
                    for line in log.lines() {
                        eprintln!("    {}", line.dimmed());
                    }
                }
                failed += 1;
            }
        }
    }

    let runnable = plan.runnable_matches().count();

    if teardown {
        for (id, e) in plan.teardown_all(&harness) {
            eprintln!("{} env {}: teardown failed: {}", "⊙".yellow(), id.0, e);
        }
    }

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} built", format!("{built}").green());
    println!("  {} failed", format!("{failed}").red());
    println!(
        "  {} of {} matches runnable",
        format!("{runnable}").cyan(),
        plan.matches().len()
    );

    if failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn parse_redirect(spec: &str, mode: StubMode, owner: &str) -> Result<CallSiteRewriter> {
    let (source, target) = spec
        .split_once('=')
        .with_context(|| format!("redirect '{spec}' must look like source=target"))?;
    let target = format!("{owner}.{target}");
    Ok(CallSiteRewriter::new(source, target, mode)?)
}

fn cmd_stub(
    config: &HarnessConfig,
    dir: &Path,
    owner: &str,
    member: &[String],
    statics: &[String],
    write: bool,
) -> Result<()> {
    let self_token = if config.self_token.is_empty() {
        SELF_TOKEN
    } else {
        config.self_token.as_str()
    };
    let mut rewriters = Vec::new();
    for spec in member {
        rewriters.push(parse_redirect(spec, StubMode::Member, owner)?.with_self_token(self_token));
    }
    for spec in statics {
        rewriters.push(parse_redirect(spec, StubMode::Static, owner)?);
    }
    if rewriters.is_empty() {
        anyhow::bail!("nothing to do: pass at least one --member or --static redirect");
    }

    let mut changed = 0;
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().is_file()
            || path.extension().and_then(|e| e.to_str()) != Some(config.source_extension.as_str())
        {
            continue;
        }

        let original = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let patched = apply_stubs(&original, &rewriters);
        if patched == original {
            continue;
        }

        if write {
            if write_if_changed(path, &patched)?.is_written() {
                println!("{} {}", "✓".green(), path.display());
                changed += 1;
            }
        } else {
            display_diff(path, &original, &patched);
            changed += 1;
        }
    }

    println!();
    if write {
        println!("{} files rewritten", format!("{changed}").green());
    } else {
        println!("{} files would change", format!("{changed}").yellow());
    }
    Ok(())
}

fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (stubbed)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);
    for change in diff.iter_all_changes() {
        let line = match change.tag() {
            ChangeTag::Delete => format!("-{change}").red(),
            ChangeTag::Insert => format!("+{change}").green(),
            ChangeTag::Equal => continue,
        };
        print!("{line}");
    }
}

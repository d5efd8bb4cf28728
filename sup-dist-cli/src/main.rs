use anyhow::{Error, Result};
use clap::{Arg, ArgAction, ArgGroup, ArgMatches, Command};
use log::{error, info};
use std::{fs, path::Path};
use sup_dist::{Formula, PackagerBuilder, ReleaseLinkBuilder, DEFAULT_PROJECT};
use thiserror::Error;

#[derive(Debug, Error)]
enum SupDistError {
    #[error("{0:}")]
    InvalidArgsError(String),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cmd = cmd();
    let matches = cmd.get_matches();
    let res = init_logger_from_matches(&matches);
    if let Err(e) = res {
        eprintln!("Error creating logger: {e}");
        std::process::exit(126);
    }

    let status = match run(&matches).await {
        Ok(()) => 0,
        Err(e) => {
            print_err(&e);
            if e.downcast_ref::<SupDistError>().is_some() {
                127
            } else {
                1
            }
        }
    };
    std::process::exit(status);
}

const MAX_TERM_WIDTH: usize = 100;

fn project_args() -> [Arg; 2] {
    [
        Arg::new("project")
            .long("project")
            .short('p')
            .default_value(DEFAULT_PROJECT)
            .help("The GitHub project whose tags are used, like pressly/sup."),
        Arg::new("api-base-url").long("api-base-url").help(concat!(
            "The base URL for the GitHub API. This is useful for testing or if you want to",
            " operate against GitHub Enterprise. This should be something like",
            " `https://github.my-corp.example.com/api/v3`.",
        )),
    ]
}

#[allow(clippy::too_many_lines)]
fn cmd() -> Command {
    Command::new("sup-dist")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Release link and packaging tooling for sup")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("latest-tag")
                .about("Print the newest release of the project, without its leading `v`.")
                .args(project_args()),
        )
        .subcommand(
            Command::new("update-page")
                .about(concat!(
                    "Point the element with id=\"releases\" in an HTML page at the newest",
                    " release. If the release can't be looked up the page is left untouched.",
                ))
                .arg(
                    Arg::new("page")
                        .required(true)
                        .help("The HTML page to update."),
                )
                .arg(Arg::new("output").long("output").short('o').help(
                    "Write the updated page here instead of updating the page in place.",
                ))
                .args(project_args()),
        )
        .subcommand(
            Command::new("package")
                .about(concat!(
                    "Build sup from its pinned source archive, install it into <prefix>/bin,",
                    " and smoke-test it.",
                ))
                .arg(Arg::new("prefix").long("prefix").help(
                    "The install prefix. Defaults to ./<name>-<version> in the current directory.",
                ))
                .arg(Arg::new("build-dir").long("build-dir").help(concat!(
                    "The directory to unpack and build in. Defaults to a temporary directory",
                    " that is removed afterwards.",
                )))
                .arg(
                    Arg::new("keep-build-dir")
                        .long("keep-build-dir")
                        .action(ArgAction::SetTrue)
                        .conflicts_with("build-dir")
                        .help("Do not remove the temporary build directory when done."),
                )
                .arg(Arg::new("go").long("go").help(
                    "The go executable to build with. By default `go` is looked up in your PATH.",
                ))
                .arg(
                    Arg::new("url")
                        .long("url")
                        .requires("sha256")
                        .help("Build from this source archive instead of the pinned one."),
                )
                .arg(
                    Arg::new("sha256")
                        .long("sha256")
                        .help("The SHA-256 digest of the archive given with --url."),
                )
                .arg(
                    Arg::new("source-version")
                        .long("source-version")
                        .help("The version of the archive given with --url."),
                )
                .arg(Arg::new("expect-output").long("expect-output").help(
                    "The exact output the built executable must print when run with no arguments.",
                )),
        )
        .subcommand(Command::new("formula").about("Print the pinned formula."))
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output."),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .action(ArgAction::SetTrue)
                .help("Enable debugging output."),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppresses most output."),
        )
        .group(ArgGroup::new("log-level").args(["verbose", "debug", "quiet"]))
        .max_term_width(MAX_TERM_WIDTH)
}

pub(crate) fn init_logger_from_matches(matches: &ArgMatches) -> Result<(), log::SetLoggerError> {
    let level = if matches.get_flag("debug") {
        log::LevelFilter::Debug
    } else if matches.get_flag("verbose") {
        log::LevelFilter::Info
    } else if matches.get_flag("quiet") {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Warn
    };

    sup_dist::init_logger(level)
}

async fn run(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("latest-tag", sub)) => latest_tag(sub).await,
        Some(("update-page", sub)) => update_page(sub).await,
        Some(("package", sub)) => package(sub).await,
        Some(("formula", _)) => {
            println!("{}", Formula::sup());
            Ok(())
        }
        Some((name, _)) => Err(SupDistError::InvalidArgsError(format!(
            "Unknown subcommand `{name}`"
        ))
        .into()),
        None => Err(
            SupDistError::InvalidArgsError("You must pass a subcommand.".to_string()).into(),
        ),
    }
}

fn release_link_builder(matches: &ArgMatches) -> ReleaseLinkBuilder<'_> {
    let mut builder = ReleaseLinkBuilder::new();
    if let Some(p) = matches.get_one::<String>("project") {
        builder = builder.project(p);
    }
    if let Some(url) = matches.get_one::<String>("api-base-url") {
        builder = builder.api_base_url(url);
    }
    builder
}

async fn latest_tag(matches: &ArgMatches) -> Result<()> {
    let updater = release_link_builder(matches).build()?;
    let tag = updater.latest_tag().await?;
    println!("{}", tag.label());
    Ok(())
}

async fn update_page(matches: &ArgMatches) -> Result<()> {
    let Some(page_path) = matches.get_one::<String>("page") else {
        return Err(SupDistError::InvalidArgsError("You must pass a page.".to_string()).into());
    };
    let page = fs::read_to_string(page_path)?;

    let updater = release_link_builder(matches).build()?;
    let updated = updater.update(&page).await;

    let output = matches
        .get_one::<String>("output")
        .map_or(Path::new(page_path), Path::new);
    if updated == page && output == Path::new(page_path) {
        info!("The release link in {page_path} was not changed");
        return Ok(());
    }
    fs::write(output, updated)?;
    info!("Wrote {}", output.display());

    Ok(())
}

async fn package(matches: &ArgMatches) -> Result<()> {
    let formula = formula_from_matches(matches)?;

    let mut builder = PackagerBuilder::new().formula(formula);
    if let Some(prefix) = matches.get_one::<String>("prefix") {
        builder = builder.prefix(prefix);
    }
    if let Some(dir) = matches.get_one::<String>("build-dir") {
        builder = builder.build_dir(dir);
    }
    if matches.get_flag("keep-build-dir") {
        builder = builder.keep_build_dir();
    }
    if let Some(go) = matches.get_one::<String>("go") {
        builder = builder.go(go);
    }

    let exe = builder.build()?.package().await?;
    println!("{}", exe.display());
    Ok(())
}

fn formula_from_matches(matches: &ArgMatches) -> Result<Formula> {
    let mut formula = Formula::sup();

    match (
        matches.get_one::<String>("url"),
        matches.get_one::<String>("sha256"),
    ) {
        (Some(url), Some(sha256)) => {
            formula.url.clone_from(url);
            formula.sha256.clone_from(sha256);
        }
        (None, Some(_)) => {
            return Err(SupDistError::InvalidArgsError(
                "You cannot pass --sha256 without --url".to_string(),
            )
            .into());
        }
        (Some(_), None) => {
            return Err(SupDistError::InvalidArgsError(
                "You must pass --sha256 with --url".to_string(),
            )
            .into());
        }
        (None, None) => (),
    }
    if let Some(version) = matches.get_one::<String>("source-version") {
        formula.version.clone_from(version);
    }
    if let Some(expect) = matches.get_one::<String>("expect-output") {
        formula.smoke_test.expect_output.clone_from(expect);
    }

    Ok(formula)
}

fn print_err(e: &Error) {
    error!("{e:#}");
    if let Some(se) = e.downcast_ref::<SupDistError>() {
        match se {
            SupDistError::InvalidArgsError(_) => {
                println!();
                // Nothing useful can be done if printing the help fails.
                let _ = cmd().print_help();
            }
        }
    }
}

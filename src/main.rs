use std::env;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use log::{debug, LevelFilter};
use tis_rust::{IoKind, Tis};

#[derive(Default)]
struct CliArgs {
    verbosity: i32,
    cycle_limit: Option<u64>,
    layout_is_string: bool,
    numeric_io: bool,
    positionals: Vec<String>,
    unknown: Vec<char>,
    show_help: bool,
}

fn print_usage(program: &str) {
    eprintln!("Usage:");
    eprintln!("    {program} [opts] <source>");
    eprintln!("    {program} [opts] <source> <layout>");
    eprintln!("    {program} [opts] <source> <rows> <cols>");
    eprintln!();
    eprintln!("Options:");
    eprintln!("    -c <n>  cycle limit; stop the emulator after this many cycles");
    eprintln!("    -h      help; show this text");
    eprintln!("    -l      layout string; the layout argument is the layout");
    eprintln!("                text itself instead of a file name");
    eprintln!("    -n      numeric; the default layout uses numeric io instead");
    eprintln!("                of ascii, only relevant without a custom layout");
    eprintln!("    -q      quiet; decrease verbosity by one level, may be");
    eprintln!("                provided multiple times");
    eprintln!("    -v      verbose; increase verbosity by one level, may be");
    eprintln!("                provided multiple times");
}

fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut cli = CliArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        // A bare "-" is a positional meaning standard input.
        let Some(flags) = arg.strip_prefix('-').filter(|rest| !rest.is_empty()) else {
            cli.positionals.push(arg.clone());
            continue;
        };
        let mut chars = flags.chars();
        while let Some(flag) = chars.next() {
            match flag {
                'c' => {
                    // The count may be attached ("-c50") or the next argument.
                    let rest: String = chars.collect();
                    let value = if rest.is_empty() {
                        iter.next()
                            .cloned()
                            .context("option -c requires a cycle count")?
                    } else {
                        rest
                    };
                    let limit: u64 = value
                        .parse()
                        .with_context(|| format!("invalid cycle count '{value}'"))?;
                    cli.cycle_limit = (limit > 0).then_some(limit);
                    break;
                }
                'h' => cli.show_help = true,
                'l' => cli.layout_is_string = true,
                'n' => cli.numeric_io = true,
                'q' => cli.verbosity -= 1,
                'v' => cli.verbosity += 1,
                other => cli.unknown.push(other),
            }
        }
    }
    if cli.show_help {
        return Ok(cli);
    }
    match cli.positionals.len() {
        0 => bail!("too few arguments"),
        1..=3 => {}
        _ => bail!("too many arguments"),
    }
    Ok(cli)
}

fn read_text(path: &str) -> Result<String> {
    if path == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("unable to read layout from standard input")?;
        return Ok(text);
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("unable to open layout file '{path}' for reading"))
}

fn run(cli: &CliArgs) -> Result<()> {
    let default_io = if cli.numeric_io {
        IoKind::Numeric
    } else {
        IoKind::Ascii
    };

    let mut tis = match cli.positionals.len() {
        1 => {
            debug!("using default dimensions 3r 4c");
            Tis::with_default_grid(3, 4, default_io, default_io)?
        }
        2 => {
            let layout = if cli.layout_is_string {
                cli.positionals[1].clone()
            } else {
                read_text(&cli.positionals[1])?
            };
            Tis::from_layout(&layout)?
        }
        _ => {
            let rows = cli.positionals[1]
                .parse()
                .with_context(|| format!("invalid row count '{}'", cli.positionals[1]))?;
            let cols = cli.positionals[2]
                .parse()
                .with_context(|| format!("invalid column count '{}'", cli.positionals[2]))?;
            debug!("read dimensions {rows}r {cols}c from command line");
            Tis::with_default_grid(rows, cols, default_io, default_io)?
        }
    };

    let source = &cli.positionals[0];
    if source == "-" {
        tis.load_source(io::stdin().lock())
            .context("unable to read source from standard input")?;
    } else {
        let file = File::open(source)
            .with_context(|| format!("unable to open source file '{source}' for reading"))?;
        tis.load_source(BufReader::new(file))
            .with_context(|| format!("unable to read source file '{source}'"))?;
    }

    let outcome = tis.run(cli.cycle_limit);
    debug!("run finished: {outcome:?}");
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let program = args
        .first()
        .map(String::as_str)
        .unwrap_or("tis-rust")
        .to_string();

    let cli = match parse_args(&args[1..]) {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("ERROR:\t{err:#}");
            print_usage(&program);
            return ExitCode::FAILURE;
        }
    };
    if cli.show_help {
        print_usage(&program);
        return ExitCode::SUCCESS;
    }

    // The original's four stderr levels, mapped onto the log crate;
    // RUST_LOG can still override per module.
    let filter = match cli.verbosity {
        i32::MIN..=-2 => LevelFilter::Off,
        -1 => LevelFilter::Error,
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(filter)
        .parse_default_env()
        .init();
    for flag in &cli.unknown {
        log::error!("skipping unimplemented option '-{flag}'");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

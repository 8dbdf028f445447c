//! Command-line driver for `lpp`. Hand-rolled flag parsing rather than
//! pulling in an argument-parsing crate, matching the interpreter binary's
//! own minimal `parse_args` style.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use lpp_core::engine::{Config, Lpp};

const VERSION: &str = "lpp 0.1.0";

fn print_usage() {
    eprintln!("usage: lpp [options] <input>");
    eprintln!("Available options are:");
    eprintln!("  -o PATH   write preprocessed output to PATH (default: stdout)");
    eprintln!("  -D PATH   write a make-style dependency line to PATH");
    eprintln!("  -M PATH   write the generated meta script to PATH");
    eprintln!("  -R DIR    add DIR to the script require search path (repeatable)");
    eprintln!("  -C DIR    add DIR to the native-module search path (repeatable)");
    eprintln!("  -I DIR    add DIR to the include search path (repeatable)");
    eprintln!("  --version print the version and exit");
    eprintln!("  --        stop handling options");
    eprintln!("anything else is forwarded to scripts as `argv`");
}

struct Options {
    input: Option<String>,
    output: Option<PathBuf>,
    dep_file: Option<PathBuf>,
    meta_file: Option<PathBuf>,
    require_dirs: Vec<PathBuf>,
    native_module_dirs: Vec<PathBuf>,
    include_dirs: Vec<PathBuf>,
    extra_args: Vec<String>,
    show_version: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            input: None,
            output: None,
            dep_file: None,
            meta_file: None,
            require_dirs: Vec::new(),
            native_module_dirs: Vec::new(),
            include_dirs: Vec::new(),
            extra_args: Vec::new(),
            show_version: false,
        }
    }
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut opts = Options::default();
    let mut i = 0;
    let mut stop_options = false;

    while i < args.len() {
        let arg = &args[i];

        if !stop_options && arg.starts_with('-') && arg != "-" {
            match arg.as_str() {
                "-o" => {
                    i += 1;
                    opts.output = Some(require_value(&args, i, "-o")?.into());
                }
                "-D" => {
                    i += 1;
                    opts.dep_file = Some(require_value(&args, i, "-D")?.into());
                }
                "-M" => {
                    i += 1;
                    opts.meta_file = Some(require_value(&args, i, "-M")?.into());
                }
                "-R" => {
                    i += 1;
                    opts.require_dirs.push(require_value(&args, i, "-R")?.into());
                }
                "-C" => {
                    i += 1;
                    opts.native_module_dirs.push(require_value(&args, i, "-C")?.into());
                }
                "-I" => {
                    i += 1;
                    opts.include_dirs.push(require_value(&args, i, "-I")?.into());
                }
                "--version" => {
                    opts.show_version = true;
                }
                "--" => {
                    stop_options = true;
                }
                _ => {
                    opts.extra_args.push(arg.clone());
                }
            }
        } else if opts.input.is_none() {
            opts.input = Some(arg.clone());
        } else {
            opts.extra_args.push(arg.clone());
        }
        i += 1;
    }

    Ok(opts)
}

fn require_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i).map(String::as_str).ok_or_else(|| format!("'{flag}' needs an argument"))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let opts = match parse_args() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("lpp: {e}");
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    if opts.show_version {
        println!("{VERSION}");
        return ExitCode::SUCCESS;
    }

    let Some(input_path) = &opts.input else {
        print_usage();
        return ExitCode::FAILURE;
    };

    let mut input_file = match File::open(input_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("lpp: cannot open '{input_path}': {e}");
            return ExitCode::FAILURE;
        }
    };

    let config = opts
        .extra_args
        .iter()
        .fold(Config::new(input_path.clone()), |c, a| c.with_extra_arg(a.clone()));
    let config = opts
        .require_dirs
        .iter()
        .fold(config, |c, d| c.with_require_dir(d.clone()));
    let config = opts
        .native_module_dirs
        .iter()
        .fold(config, |c, d| c.with_native_module_dir(d.clone()));
    let config = opts
        .include_dirs
        .iter()
        .fold(config, |c, d| c.with_include_dir(d.clone()));

    let mut lpp = match Lpp::init(config) {
        Ok(lpp) => lpp,
        Err(e) => {
            eprintln!("lpp: failed to start: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut stdout_handle;
    let mut output_file;
    let output: &mut dyn Write = match &opts.output {
        Some(path) => {
            output_file = match File::create(path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("lpp: cannot create '{}': {e}", path.display());
                    return ExitCode::FAILURE;
                }
            };
            &mut output_file
        }
        None => {
            stdout_handle = io::stdout();
            &mut stdout_handle
        }
    };

    let mut dep_file = match &opts.dep_file {
        Some(path) => match File::create(path) {
            Ok(f) => Some(f),
            Err(e) => {
                eprintln!("lpp: cannot create '{}': {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let mut meta_file = match &opts.meta_file {
        Some(path) => match File::create(path) {
            Ok(f) => Some(f),
            Err(e) => {
                eprintln!("lpp: cannot create '{}': {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let result = lpp.run(
        input_path,
        &mut input_file,
        output,
        dep_file.as_mut().map(|f| f as &mut dyn Write),
        meta_file.as_mut().map(|f| f as &mut dyn Write),
    );

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("lpp: {e}");
            ExitCode::FAILURE
        }
    }
}

//! The top-level driver: owns the single script VM, the active consumer,
//! and the dependency set accumulated across a run.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::consumer::{Consumer, NullConsumer};
use crate::diagnostics::LppError;
use crate::metaprogram::Metaprogram;
use crate::script::vm::ScriptVm;
use crate::source::Source;

/// Everything `Lpp::init` needs besides the actual I/O streams.
pub struct Config {
    pub input_name: String,
    /// Extra command-line arguments not consumed by the CLI's own flags,
    /// exposed to scripts as `argv`.
    pub extra_args: Vec<String>,
    pub require_dirs: Vec<PathBuf>,
    pub include_dirs: Vec<PathBuf>,
    pub native_module_dirs: Vec<PathBuf>,
    pub consumer: Option<Box<dyn Consumer>>,
}

impl Config {
    pub fn new(input_name: impl Into<String>) -> Self {
        Config {
            input_name: input_name.into(),
            extra_args: Vec::new(),
            require_dirs: Vec::new(),
            include_dirs: Vec::new(),
            native_module_dirs: Vec::new(),
            consumer: None,
        }
    }

    pub fn with_consumer(mut self, consumer: Box<dyn Consumer>) -> Self {
        self.consumer = Some(consumer);
        self
    }

    pub fn with_include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    pub fn with_require_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.require_dirs.push(dir.into());
        self
    }

    pub fn with_native_module_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.native_module_dirs.push(dir.into());
        self
    }

    pub fn with_extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }
}

/// Owns the single embedded script VM and the state that outlives any one
/// Metaprogram: search directories, `argv`, the dependency set, and the
/// registered consumer.
pub struct Lpp {
    pub(crate) vm: ScriptVm,
    consumer: Box<dyn Consumer>,
    pub extra_args: Vec<String>,
    pub require_dirs: Vec<PathBuf>,
    pub include_dirs: Vec<PathBuf>,
    pub native_module_dirs: Vec<PathBuf>,
    dependencies: Vec<String>,
}

impl Lpp {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn init(config: Config) -> Result<Self, LppError> {
        let vm = ScriptVm::new().map_err(|e| {
            crate::diagnostics::ScriptLoadError {
                input_name: config.input_name.clone(),
                loc: crate::diagnostics::Loc { line: 0, column: 0 },
                message: format!("failed to initialize script VM: {e}"),
            }
        })?;
        Ok(Lpp {
            vm,
            consumer: config.consumer.unwrap_or_else(|| Box::new(NullConsumer)),
            extra_args: config.extra_args,
            require_dirs: config.require_dirs,
            include_dirs: config.include_dirs,
            native_module_dirs: config.native_module_dirs,
            dependencies: Vec::new(),
        })
    }

    pub(crate) fn consumer_mut(&mut self) -> &mut dyn Consumer {
        self.consumer.as_mut()
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub(crate) fn add_dependency(&mut self, path: String) {
        self.dependencies.push(path);
    }

    /// Process one input stream through the full three-phase pipeline,
    /// writing the result to `output`.
    #[tracing::instrument(level = "info", skip_all, fields(source = %name))]
    pub fn process_stream(
        &mut self,
        name: &str,
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<(), LppError> {
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;
        let source = Source::with_content(name.to_string(), bytes);

        let self_ptr = self as *mut Lpp;
        let mut mp = Metaprogram::new(self_ptr, source, format!("{name}(output)"), None);
        mp.run()?;

        output.write_all(mp.output.as_bytes())?;
        Ok(())
    }

    /// Process the configured primary input and, if requested, emit the
    /// dependency-file and meta-file streams.
    pub fn run(
        &mut self,
        input_name: &str,
        input: &mut dyn Read,
        output: &mut dyn Write,
        dep_output: Option<&mut dyn Write>,
        meta_output: Option<&mut dyn Write>,
    ) -> Result<(), LppError> {
        // `MetafileCapture` holds an `Rc<RefCell<String>>` rather than a
        // borrow: `self.consumer` is `Box<dyn Consumer + 'static>`, and a
        // `run` call installing the capturing wrapper doesn't restore the
        // caller's original consumer afterward (the one-shot `init`/`run`/
        // `deinit` lifecycle this mirrors never calls `run` twice), so the
        // wrapper must own its buffer rather than borrow a local.
        let meta_buf = std::rc::Rc::new(std::cell::RefCell::new(String::new()));
        if meta_output.is_some() {
            struct MetafileCapture(std::rc::Rc<std::cell::RefCell<String>>);
            impl Consumer for MetafileCapture {
                fn consume_metafile(&mut self, _mp: &Metaprogram, script: &str) {
                    self.0.borrow_mut().push_str(script);
                }
            }
            let prev_consumer = std::mem::replace(&mut self.consumer, Box::new(NullConsumer));
            self.consumer = Box::new(ChainConsumer(prev_consumer, Box::new(MetafileCapture(meta_buf.clone()))));
        }

        let result = self.process_stream(input_name, input, output);

        if let Some(w) = meta_output {
            w.write_all(meta_buf.borrow().as_bytes())?;
        }

        result?;

        if let Some(w) = dep_output {
            let line = self.dependency_line(input_name);
            w.write_all(line.as_bytes())?;
            w.write_all(b"\n")?;
        }

        Ok(())
    }

    fn dependency_line(&self, output_name: &str) -> String {
        format!("{output_name}: {}", self.dependencies.join(" "))
    }

    pub fn deinit(self) {}

    /// Resolve `path` against the configured include directories, falling
    /// back to treating it as already relative/absolute, then recursively
    /// process it and return its spliced output.
    pub(crate) fn process_file_nested(
        &mut self,
        path: &str,
        requesting_mp: *mut Metaprogram,
    ) -> Result<String, LppError> {
        let resolved = self.resolve_path(path)?;
        self.add_dependency(resolved.display().to_string());

        let bytes = std::fs::read(&resolved)?;
        let source = Source::with_content(resolved.display().to_string(), bytes);

        let self_ptr = self as *mut Lpp;
        let output_name = format!("{}(output)", resolved.display());
        let mut mp = Metaprogram::new(self_ptr, source, output_name, Some(requesting_mp));
        mp.run_to_string()
    }

    fn resolve_path(&self, path: &str) -> Result<PathBuf, LppError> {
        let candidate = Path::new(path);
        if candidate.exists() {
            return Ok(candidate.to_path_buf());
        }
        for dir in self.include_dirs.iter().chain(self.require_dirs.iter()) {
            let joined = dir.join(candidate);
            if joined.exists() {
                return Ok(joined);
            }
        }
        Err(LppError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("lpp.processFile: could not resolve '{path}' against any search directory"),
        )))
    }
}

/// Forwards every call to both inner consumers; used by `run` to capture
/// the generated meta script without discarding whatever consumer the
/// caller already registered.
struct ChainConsumer(Box<dyn Consumer>, MetafileCaptureBox);

type MetafileCaptureBox = Box<dyn Consumer>;

impl Consumer for ChainConsumer {
    fn consume_diag(&mut self, diag: &crate::diagnostics::Diagnostic) {
        self.0.consume_diag(diag);
        self.1.consume_diag(diag);
    }

    fn consume_section(
        &mut self,
        mp: &Metaprogram,
        section: &crate::section::Section,
        start: usize,
        end: usize,
    ) {
        self.0.consume_section(mp, section, start, end);
        self.1.consume_section(mp, section, start, end);
    }

    fn consume_expansions(&mut self, mp: &Metaprogram, expansions: &[crate::expansion::Expansion]) {
        self.0.consume_expansions(mp, expansions);
        self.1.consume_expansions(mp, expansions);
    }

    fn consume_metafile(&mut self, mp: &Metaprogram, script: &str) {
        self.0.consume_metafile(mp, script);
        self.1.consume_metafile(mp, script);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_stream_round_trips_pure_document() {
        let mut lpp = Lpp::init(Config::new("t")).expect("vm init");
        let mut out = Vec::new();
        lpp.process_stream("t", &mut "hello\n".as_bytes(), &mut out).expect("process_stream");
        assert_eq!(out, b"hello\n");
    }

    #[test]
    fn dependency_line_is_make_style() {
        let mut lpp = Lpp::init(Config::new("t")).expect("vm init");
        lpp.add_dependency("a.lpp".to_string());
        lpp.add_dependency("b.lpp".to_string());
        assert_eq!(lpp.dependency_line("out.c"), "out.c: a.lpp b.lpp");
    }
}

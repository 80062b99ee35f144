use staffsplit_ports::omr::{MusicXmlPayload, OmrError, OmrOptions, OmrOutput, OmrPort};
use staffsplit_ports::types::{EngineKind, StripIndex};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const INPUT_STEM: &str = "strip";
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const OEMER_NO_DESKEW: &str = "--without-deskew";

static JOB_SEQ: AtomicU64 = AtomicU64::new(0);

/// Runs an OMR engine executable (Audiveris or oemer) once per strip.
pub struct ProcessOmr {
    kind: EngineKind,
    default_engine_path: Option<String>,
    work_root: PathBuf,
}

impl ProcessOmr {
    pub fn new(kind: EngineKind, default_engine_path: Option<String>) -> Self {
        Self {
            kind,
            default_engine_path,
            work_root: std::env::temp_dir().join("staffsplit-omr"),
        }
    }

    pub fn with_work_root(mut self, work_root: PathBuf) -> Self {
        self.work_root = work_root;
        self
    }

    fn engine_path(&self, options: &OmrOptions) -> String {
        let engine = options
            .engine_path
            .clone()
            .or_else(|| self.default_engine_path.clone())
            .unwrap_or_else(|| self.kind.default_binary().to_string());
        Self::normalize_engine_path(&engine)
    }

    /// macOS ships Audiveris as an app bundle; run the binary inside it.
    fn normalize_engine_path(engine: &str) -> String {
        let engine = engine.trim();
        let path = Path::new(engine);
        let ext_is_app = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("app"));

        if ext_is_app {
            let candidate = path.join("Contents").join("MacOS").join("Audiveris");
            if candidate.exists() {
                return candidate.to_string_lossy().into_owned();
            }
        }

        engine.to_string()
    }

    fn make_workdir(&self, strip_index: StripIndex) -> Result<PathBuf, OmrError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| OmrError::Backend(e.to_string()))?
            .as_millis();
        let pid = std::process::id();
        let seq = JOB_SEQ.fetch_add(1, Ordering::Relaxed);
        let dir = self
            .work_root
            .join(format!("job-{}-{}-{}-strip{}", pid, now, seq, strip_index));
        fs::create_dir_all(&dir).map_err(|e| OmrError::Backend(e.to_string()))?;
        Ok(dir)
    }

    fn command(&self, engine: &str, input: &Path, output_dir: &Path) -> Command {
        let mut command = Command::new(engine);
        match self.kind {
            EngineKind::Audiveris => {
                command
                    .arg("-batch")
                    .arg("-export")
                    .arg("-output")
                    .arg(output_dir)
                    .arg(input);
            }
            EngineKind::Oemer => {
                command.arg(input).arg("-o").arg(output_dir);
            }
        }
        command
    }

    fn run(
        &self,
        mut command: Command,
        log_path: &Path,
        deadline: Option<Duration>,
    ) -> Result<ExitStatus, OmrError> {
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(|e| OmrError::Backend(format!("failed to open engine log: {e}")))?;
        let log_file_err = log_file
            .try_clone()
            .map_err(|e| OmrError::Backend(format!("failed to clone engine log handle: {e}")))?;

        // Engine output goes straight to the log so a chatty engine cannot fill a pipe.
        let mut child = command
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err))
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    OmrError::Backend(format!("{} engine not found", self.kind))
                } else {
                    OmrError::Backend(format!("failed to launch {}: {e}", self.kind))
                }
            })?;

        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if let Some(limit) = deadline {
                        if started.elapsed() >= limit {
                            let _ = child.kill();
                            let _ = child.wait();
                            return Err(OmrError::Timeout(limit));
                        }
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(OmrError::Backend(format!(
                        "failed waiting for {}: {err}",
                        self.kind
                    )));
                }
            }
        }
    }

    fn recognize_in(
        &self,
        workdir: &Path,
        png: &[u8],
        options: &OmrOptions,
    ) -> Result<MusicXmlPayload, OmrError> {
        let input_path = workdir.join(format!("{}.png", INPUT_STEM));
        fs::write(&input_path, png).map_err(|e| OmrError::Backend(e.to_string()))?;
        let output_dir = workdir.join("out");
        fs::create_dir_all(&output_dir).map_err(|e| OmrError::Backend(e.to_string()))?;

        let engine = self.engine_path(options);
        let log_path = workdir.join("engine.log");
        let started = Instant::now();
        debug!(strip_index = options.strip_index, %engine, "launching engine");
        let command = self.command(&engine, &input_path, &output_dir);
        let mut status = self.run(command, &log_path, options.deadline)?;
        let mut found = find_output_musicxml(&output_dir, INPUT_STEM);

        // oemer gets one more run with deskewing off when the first wrote nothing.
        if !status.success() && found.is_none() && self.kind == EngineKind::Oemer {
            let remaining = match options.deadline {
                Some(limit) => match limit.checked_sub(started.elapsed()) {
                    Some(left) if !left.is_zero() => Some(left),
                    _ => return Err(OmrError::Timeout(limit)),
                },
                None => None,
            };
            warn!(strip_index = options.strip_index, "oemer failed, retrying without deskew");
            let mut retry = self.command(&engine, &input_path, &output_dir);
            retry.arg(OEMER_NO_DESKEW);
            status = self.run(retry, &log_path, remaining)?;
            found = find_output_musicxml(&output_dir, INPUT_STEM);
        }
        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "?".to_string());
            match &found {
                // The engine may crash after it already wrote a usable document.
                Some(path) => warn!(
                    strip_index = options.strip_index,
                    %code,
                    path = %path.display(),
                    "engine failed, recovering written MusicXML"
                ),
                None => {
                    return Err(OmrError::RecognitionFailed(format!(
                        "{} failed (exit code: {code})",
                        self.kind
                    )))
                }
            }
        }

        let path = found.ok_or_else(|| {
            OmrError::RecognitionFailed(format!("{} did not produce MusicXML", self.kind))
        })?;
        read_payload(&path)
    }
}

impl OmrPort for ProcessOmr {
    fn recognize_png(&self, png: &[u8], options: &OmrOptions) -> Result<OmrOutput, OmrError> {
        let workdir = self.make_workdir(options.strip_index)?;
        let result = self.recognize_in(&workdir, png, options);

        let diagnostics_path = if options.enable_diagnostics {
            Some(workdir.join("engine.log"))
        } else {
            if let Err(err) = fs::remove_dir_all(&workdir) {
                warn!(path = %workdir.display(), %err, "failed to remove engine workdir");
            }
            None
        };

        let musicxml = result?;
        info!(strip_index = options.strip_index, engine = %self.kind, "strip recognized");
        Ok(OmrOutput {
            musicxml,
            diagnostics_path,
        })
    }

    fn name(&self) -> &str {
        self.kind.default_binary()
    }
}

fn read_payload(path: &Path) -> Result<MusicXmlPayload, OmrError> {
    let is_mxl = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mxl"));
    if is_mxl {
        let data = fs::read(path).map_err(|e| OmrError::Backend(e.to_string()))?;
        return Ok(MusicXmlPayload::Compressed(data));
    }
    let text = fs::read_to_string(path).map_err(|e| OmrError::Backend(e.to_string()))?;
    Ok(MusicXmlPayload::Plain(text))
}

fn is_musicxml_ext(ext: &str) -> bool {
    ext.eq_ignore_ascii_case("mxl")
        || ext.eq_ignore_ascii_case("xml")
        || ext.eq_ignore_ascii_case("musicxml")
}

/// Prefer `<stem>.mxl`, then `<stem>.xml`/`.musicxml`, then any MusicXML file
/// found within a few directory levels.
pub fn find_output_musicxml(output_dir: &Path, stem: &str) -> Option<PathBuf> {
    for ext in ["mxl", "xml", "musicxml"] {
        let candidate = output_dir.join(format!("{}.{}", stem, ext));
        if candidate.exists() {
            return Some(candidate);
        }
    }

    find_output_musicxml_recursive(output_dir, stem, 0)
}

fn find_output_musicxml_recursive(dir: &Path, stem: &str, depth: usize) -> Option<PathBuf> {
    if depth > 6 {
        return None;
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .collect();
    entries.sort();

    let mut best_other: Option<PathBuf> = None;
    for path in entries {
        if path.is_dir() {
            if let Some(found) = find_output_musicxml_recursive(&path, stem, depth + 1) {
                return Some(found);
            }
            continue;
        }

        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !is_musicxml_ext(ext) {
            continue;
        }

        let file_stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        if file_stem == stem {
            return Some(path);
        }

        if best_other.is_none() {
            best_other = Some(path);
        }
    }

    best_other
}

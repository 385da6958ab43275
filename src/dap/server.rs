use super::protocol::{read_message, DapMessageContent, DapWriter};
use crate::config::SchedulerConfig;
use crate::debugger::{DebugCommand, PauseState, StopReason};
use crate::error::DapError;
use crate::executor::{finish_when_idle, run_with_commands, Host, RunOutcome, TickScheduler};
use crate::script;
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

const THREAD_ID: u64 = 1;

/// What the request loop knows about the execution thread.
#[derive(Debug, Clone, Default)]
struct DebugView {
    line: Option<usize>,
}

struct Launch {
    path: PathBuf,
    source: String,
    stop_on_entry: bool,
    speed: Option<f64>,
}

pub struct DapServer<W: Write + Send + 'static> {
    writer: DapWriter<W>,
    config: SchedulerConfig,
    view: Arc<Mutex<DebugView>>,
    launch: Option<Launch>,
    configured: bool,
    breakpoints: Vec<usize>,
    commands: Option<Sender<DebugCommand>>,
    worker: Option<JoinHandle<()>>,
}

impl<W: Write + Send + 'static> DapServer<W> {
    pub fn new(out: W, config: SchedulerConfig) -> Self {
        Self {
            writer: DapWriter::new(out),
            config,
            view: Arc::new(Mutex::new(DebugView::default())),
            launch: None,
            configured: false,
            breakpoints: Vec::new(),
            commands: None,
            worker: None,
        }
    }

    pub fn writer(&self) -> &DapWriter<W> {
        &self.writer
    }

    /// Serve requests from `input` until `disconnect` or end of input.
    pub fn run(&mut self, input: &mut impl BufRead) -> Result<(), DapError> {
        info!("DAP server starting");
        while let Some(msg) = read_message(input)? {
            match msg.content {
                DapMessageContent::Request { command, arguments } => {
                    debug!(seq = msg.seq, %command, "request");
                    if !self.handle_request(msg.seq, &command, arguments)? {
                        break;
                    }
                }
                other => debug!(?other, "ignoring non-request message"),
            }
        }
        self.shutdown(false);
        info!("DAP server exiting");
        Ok(())
    }

    /// Answer one request. Returns `false` once the client has disconnected.
    pub fn handle_request(
        &mut self,
        seq: u64,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<bool, DapError> {
        let args = arguments.unwrap_or(Value::Null);
        let result = match command {
            "initialize" => Ok(Some(capabilities())),
            "launch" => self.handle_launch(&args),
            "setBreakpoints" => self.handle_set_breakpoints(&args),
            "configurationDone" => {
                self.configured = true;
                self.spawn_if_ready().map(|()| None)
            }
            "threads" => Ok(Some(json!({
                "threads": [{ "id": THREAD_ID, "name": "main" }]
            }))),
            "stackTrace" => Ok(Some(self.stack_trace())),
            "continue" => {
                self.send_command(DebugCommand::Resume);
                Ok(Some(json!({ "allThreadsContinued": true })))
            }
            "next" => {
                self.send_command(DebugCommand::StepOver);
                Ok(None)
            }
            "stepIn" => {
                self.send_command(DebugCommand::StepIn);
                Ok(None)
            }
            "stepOut" => {
                self.send_command(DebugCommand::StepOut);
                Ok(None)
            }
            "pause" => {
                self.send_command(DebugCommand::Pause);
                Ok(None)
            }
            "setSpeed" => match speed_argument(&args) {
                Ok(speed) => {
                    self.send_command(DebugCommand::SetSpeed(speed));
                    Ok(None)
                }
                Err(err) => Err(err),
            },
            "disconnect" => Ok(None),
            other => Err(DapError::Arguments {
                command: other.to_string(),
                reason: "unsupported request".to_string(),
            }),
        };

        match result {
            Ok(body) => self.writer.send_response(seq, command, true, None, body)?,
            Err(DapError::Arguments { reason, .. }) => {
                warn!(%command, %reason, "request failed");
                self.writer
                    .send_response(seq, command, false, Some(reason), None)?;
            }
            Err(err) => return Err(err),
        }

        match command {
            "initialize" => self.writer.send_event("initialized", None)?,
            "disconnect" => {
                self.shutdown(true);
                return Ok(false);
            }
            _ => {}
        }
        Ok(true)
    }

    fn handle_launch(&mut self, args: &Value) -> Result<Option<Value>, DapError> {
        let invalid = |reason: String| DapError::Arguments {
            command: "launch".to_string(),
            reason,
        };
        let path = args
            .get("program")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("missing `program`".to_string()))?;
        let source = std::fs::read_to_string(path)
            .map_err(|err| invalid(format!("cannot read {}: {}", path, err)))?;
        // Parse up front so syntax errors fail the launch request.
        script::load(&source).map_err(|err| invalid(format!("{}: {}", path, err)))?;

        let stop_on_entry = args
            .get("stopOnEntry")
            .and_then(Value::as_bool)
            .unwrap_or(self.config.pause_on_entry);
        let speed = args.get("speed").and_then(Value::as_f64);
        info!(program = path, stop_on_entry, "launch");

        self.launch = Some(Launch {
            path: PathBuf::from(path),
            source,
            stop_on_entry,
            speed,
        });
        self.spawn_if_ready()?;
        Ok(None)
    }

    fn handle_set_breakpoints(&mut self, args: &Value) -> Result<Option<Value>, DapError> {
        let lines: Vec<usize> = args
            .get("breakpoints")
            .and_then(Value::as_array)
            .map(|bps| {
                bps.iter()
                    .filter_map(|bp| bp.get("line").and_then(Value::as_u64))
                    .filter(|&line| line > 0)
                    .map(|line| line as usize)
                    .collect()
            })
            .unwrap_or_default();
        debug!(?lines, "breakpoints");

        let verified: Vec<Value> = lines
            .iter()
            .map(|line| json!({ "verified": true, "line": line }))
            .collect();
        self.breakpoints = lines.clone();
        self.send_command(DebugCommand::SetBreakpoints(lines));
        Ok(Some(json!({ "breakpoints": verified })))
    }

    fn stack_trace(&self) -> Value {
        let line = self.view.lock().ok().and_then(|view| view.line);
        let (Some(launch), Some(line)) = (&self.launch, line) else {
            return json!({ "stackFrames": [], "totalFrames": 0 });
        };
        json!({
            "stackFrames": [{
                "id": 1,
                "name": "main",
                "line": line,
                "column": 1,
                "source": source_json(&launch.path),
            }],
            "totalFrames": 1,
        })
    }

    /// Start the execution thread once the program is launched and the
    /// client has finished configuration.
    fn spawn_if_ready(&mut self) -> Result<(), DapError> {
        if !self.configured || self.worker.is_some() {
            return Ok(());
        }
        let Some(launch) = &self.launch else {
            return Ok(());
        };

        let mut config = self.config.clone();
        config.pause_on_entry = launch.stop_on_entry;
        if let Some(speed) = launch.speed {
            config.speed = speed;
        }
        let source = launch.source.clone();
        let breakpoints = self.breakpoints.clone();
        let writer = self.writer.clone();
        let view = Arc::clone(&self.view);
        let (tx, rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("tickstep-exec".to_string())
            .spawn(move || {
                let mut host = DapHost { writer, view };
                let (program, text) = match script::load(&source) {
                    Ok(loaded) => loaded,
                    Err(err) => {
                        host.output(&format!("ERROR: {}", err));
                        host.finished(&RunOutcome::Failed {
                            message: err.message,
                            line: Some(err.line),
                        });
                        return;
                    }
                };
                let mut scheduler =
                    TickScheduler::new(config, host).with_finish(finish_when_idle());
                scheduler.set_breakpoints(breakpoints);
                scheduler.start(Box::new(program), text.line_map());
                run_with_commands(&mut scheduler, &rx);
                debug!("execution thread exiting");
            })?;

        self.commands = Some(tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn send_command(&self, command: DebugCommand) {
        if let Some(tx) = &self.commands {
            if tx.send(command).is_err() {
                debug!("execution thread has already exited");
            }
        }
    }

    fn shutdown(&mut self, stop: bool) {
        if stop {
            self.send_command(DebugCommand::Stop);
        }
        self.commands = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("execution thread panicked");
            }
        }
    }
}

fn capabilities() -> Value {
    json!({
        "supportsConfigurationDoneRequest": true,
        "supportsStepBack": false,
        "supportsFunctionBreakpoints": false,
        "supportsConditionalBreakpoints": false,
        "supportsSetVariable": false,
    })
}

fn speed_argument(args: &Value) -> Result<f64, DapError> {
    args.get("speed")
        .and_then(Value::as_f64)
        .ok_or_else(|| DapError::Arguments {
            command: "setSpeed".to_string(),
            reason: "missing numeric `speed`".to_string(),
        })
}

fn source_json(path: &Path) -> Value {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("program");
    json!({ "name": name, "path": path.to_string_lossy() })
}

/// Host living on the execution thread. Turns scheduler callbacks into DAP
/// events and keeps the request loop's view current.
struct DapHost<W: Write> {
    writer: DapWriter<W>,
    view: Arc<Mutex<DebugView>>,
}

impl<W: Write> DapHost<W> {
    fn event(&self, event: &str, body: Option<Value>) {
        if let Err(err) = self.writer.send_event(event, body) {
            warn!(%err, event, "failed to send event");
        }
    }

    fn update(&self, f: impl FnOnce(&mut DebugView)) {
        if let Ok(mut view) = self.view.lock() {
            f(&mut view);
        }
    }
}

impl<W: Write> Host for DapHost<W> {
    fn output(&mut self, text: &str) {
        self.event(
            "output",
            Some(json!({ "category": "stdout", "output": format!("{}\n", text) })),
        );
    }

    fn select_line(&mut self, line: usize) {
        self.update(|view| view.line = Some(line));
    }

    fn annotate_error(&mut self, line: Option<usize>, message: &str) {
        let mut body = json!({ "category": "stderr", "output": format!("{}\n", message) });
        if let Some(line) = line {
            body["line"] = json!(line);
        }
        self.event("output", Some(body));
    }

    fn stopped(&mut self, reason: StopReason, state: &PauseState) {
        if state.stopped_at_line.is_some() {
            self.update(|view| view.line = state.stopped_at_line);
        }
        self.event(
            "stopped",
            Some(json!({
                "reason": reason,
                "threadId": THREAD_ID,
                "allThreadsStopped": true,
            })),
        );
    }

    fn finished(&mut self, outcome: &RunOutcome) {
        self.update(|view| view.line = None);
        if let RunOutcome::TimedOut { .. } = outcome {
            self.event(
                "output",
                Some(json!({ "category": "console", "output": format!("{}\n", outcome) })),
            );
        }
        self.event("terminated", None);
    }
}

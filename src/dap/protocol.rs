//! Debug Adapter Protocol message model.
//!
//! Messages on the wire are JSON objects discriminated by `type`:
//! `request`, `response`, or `event`. Outbound requests are built from the
//! typed [`Command`] enum; inbound response bodies and event bodies are
//! decoded into per-command structs on demand.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{AppError, Result};

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProtocolMessage {
    /// Client → adapter command.
    Request(RequestMessage),
    /// Adapter → client reply to a request.
    Response(ResponseMessage),
    /// Adapter → client asynchronous notification.
    Event(EventMessage),
}

impl ProtocolMessage {
    /// Sequence number of the message itself.
    #[must_use]
    pub fn seq(&self) -> i64 {
        match self {
            Self::Request(r) => r.seq,
            Self::Response(r) => r.seq,
            Self::Event(e) => e.seq,
        }
    }
}

/// Outbound request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    /// Strictly increasing per-session sequence number.
    pub seq: i64,
    /// Command name, e.g. `stackTrace`.
    pub command: String,
    /// Command-specific arguments.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub arguments: Value,
}

/// Inbound response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Sequence number assigned by the adapter.
    #[serde(default)]
    pub seq: i64,
    /// Sequence number of the request this answers.
    pub request_seq: i64,
    /// Whether the adapter carried out the request.
    pub success: bool,
    /// Command name echoed back.
    #[serde(default)]
    pub command: String,
    /// Human-readable failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Command-specific result.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body: Value,
}

impl ResponseMessage {
    /// Decode the body into a typed struct.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Dap` when the body does not have the expected shape.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone()).map_err(|err| {
            AppError::Dap(format!("unexpected `{}` response body: {err}", self.command))
        })
    }

    /// Failure message, or a generic one when the adapter gave none.
    #[must_use]
    pub fn failure_message(&self) -> String {
        self.message
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("`{}` request failed", self.command))
    }
}

/// Inbound event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Sequence number assigned by the adapter.
    #[serde(default)]
    pub seq: i64,
    /// Event name, e.g. `stopped`.
    pub event: String,
    /// Event-specific payload.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body: Value,
}

impl EventMessage {
    /// Classify the event, decoding bodies for the kinds the client acts on.
    #[must_use]
    pub fn kind(&self) -> Event {
        match self.event.as_str() {
            event::INITIALIZED => Event::Initialized,
            event::STOPPED => serde_json::from_value(self.body.clone())
                .map_or_else(|_| Event::Stopped(StoppedEventBody::default()), Event::Stopped),
            event::TERMINATED => Event::Terminated,
            event::EXITED => Event::Exited {
                exit_code: self.body.get("exitCode").and_then(Value::as_i64),
            },
            event::OUTPUT => Event::Output {
                output: self
                    .body
                    .get("output")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            },
            other => Event::Other(other.to_owned()),
        }
    }
}

/// Event names the client reacts to.
pub mod event {
    /// Adapter is ready for configuration requests.
    pub const INITIALIZED: &str = "initialized";
    /// Execution paused.
    pub const STOPPED: &str = "stopped";
    /// Debugging session ended.
    pub const TERMINATED: &str = "terminated";
    /// Debuggee exited.
    pub const EXITED: &str = "exited";
    /// Debuggee or adapter output.
    pub const OUTPUT: &str = "output";
}

/// Decoded event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// `initialized`
    Initialized,
    /// `stopped`
    Stopped(StoppedEventBody),
    /// `terminated`
    Terminated,
    /// `exited`
    Exited {
        /// Debuggee exit code.
        exit_code: Option<i64>,
    },
    /// `output`
    Output {
        /// Output text.
        output: String,
    },
    /// Any event the client does not act on.
    Other(String),
}

/// Body of a `stopped` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    /// Why execution stopped (`entry`, `step`, `breakpoint`, …).
    #[serde(default)]
    pub reason: String,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Thread that stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
    /// Additional information, e.g. an error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Arguments of `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeArguments {
    /// Client identifier.
    #[serde(rename = "clientID")]
    pub client_id: String,
    /// Client display name.
    pub client_name: String,
    /// Adapter identifier.
    #[serde(rename = "adapterID")]
    pub adapter_id: String,
    /// Lines are 1-based.
    pub lines_start_at1: bool,
    /// Columns are 1-based.
    pub columns_start_at1: bool,
    /// Paths are file-system paths rather than URIs.
    pub path_format: String,
    /// Client renders variable types.
    pub supports_variable_type: bool,
}

impl Default for InitializeArguments {
    fn default() -> Self {
        Self {
            client_id: "noir-workbench".into(),
            client_name: "Noir Workbench".into(),
            adapter_id: "noir".into(),
            lines_start_at1: true,
            columns_start_at1: true,
            path_format: "path".into(),
            supports_variable_type: true,
        }
    }
}

/// Arguments of `launch` understood by `nargo dap`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchArguments {
    /// Package directory containing `Nargo.toml`.
    pub project_folder: String,
    /// Inputs file name without extension.
    pub prover_name: String,
    /// Write ACIR after execution.
    pub generate_acir: bool,
    /// Skip debug instrumentation of the program.
    pub skip_instrumentation: bool,
}

/// A source reference as used by breakpoints and stack frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Path as the adapter reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// A requested breakpoint position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBreakpoint {
    /// 1-based line.
    pub line: i64,
    /// Optional 1-based column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
}

/// Step-like commands that take only a thread id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// `next`
    Next,
    /// `stepIn`
    StepIn,
    /// `stepOut`
    StepOut,
    /// `continue`
    Continue,
}

impl StepKind {
    /// Protocol command name.
    #[must_use]
    pub fn command(self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::StepIn => "stepIn",
            Self::StepOut => "stepOut",
            Self::Continue => "continue",
        }
    }

    /// Map a user-facing command name to the protocol command.
    ///
    /// `into` → `stepIn`, `out` → `stepOut`, `over`/`step` → `next`; the
    /// protocol names themselves pass through.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` for unknown names.
    pub fn from_user_command(name: &str) -> Result<Self> {
        match name {
            "next" | "over" | "step" => Ok(Self::Next),
            "into" | "stepIn" => Ok(Self::StepIn),
            "out" | "stepOut" => Ok(Self::StepOut),
            "continue" => Ok(Self::Continue),
            other => Err(AppError::InvalidInput(format!(
                "unknown step command '{other}'"
            ))),
        }
    }
}

/// Typed outbound command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Capability negotiation.
    Initialize(InitializeArguments),
    /// Start the debuggee.
    Launch(LaunchArguments),
    /// End of configuration.
    ConfigurationDone,
    /// Execution control on a thread.
    Step {
        /// Which step.
        kind: StepKind,
        /// Target thread.
        thread_id: i64,
    },
    /// Call stack of a thread.
    StackTrace {
        /// Target thread.
        thread_id: i64,
    },
    /// Scopes of a frame.
    Scopes {
        /// Frame id from a stack trace.
        frame_id: i64,
    },
    /// Children of a variables reference.
    Variables {
        /// Reference from a scope or variable.
        variables_reference: i64,
    },
    /// Replace all breakpoints of one source.
    SetBreakpoints {
        /// Source file.
        source: Source,
        /// Complete breakpoint set.
        breakpoints: Vec<SourceBreakpoint>,
    },
    /// End the session.
    Disconnect {
        /// Ask the adapter to terminate the debuggee.
        terminate_debuggee: bool,
    },
}

impl Command {
    /// Protocol command name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize(_) => "initialize",
            Self::Launch(_) => "launch",
            Self::ConfigurationDone => "configurationDone",
            Self::Step { kind, .. } => kind.command(),
            Self::StackTrace { .. } => "stackTrace",
            Self::Scopes { .. } => "scopes",
            Self::Variables { .. } => "variables",
            Self::SetBreakpoints { .. } => "setBreakpoints",
            Self::Disconnect { .. } => "disconnect",
        }
    }

    /// Whether this command ends the session; such commands get a longer timeout.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnect { .. })
    }

    /// JSON arguments for the request envelope.
    #[must_use]
    pub fn arguments(&self) -> Value {
        match self {
            Self::Initialize(args) => serde_json::to_value(args).unwrap_or(Value::Null),
            Self::Launch(args) => serde_json::to_value(args).unwrap_or(Value::Null),
            Self::ConfigurationDone => Value::Null,
            Self::Step { thread_id, .. } | Self::StackTrace { thread_id } => {
                json!({ "threadId": thread_id })
            }
            Self::Scopes { frame_id } => json!({ "frameId": frame_id }),
            Self::Variables {
                variables_reference,
            } => json!({ "variablesReference": variables_reference }),
            Self::SetBreakpoints {
                source,
                breakpoints,
            } => json!({
                "source": source,
                "breakpoints": breakpoints,
            }),
            Self::Disconnect { terminate_debuggee } => {
                json!({ "terminateDebuggee": terminate_debuggee })
            }
        }
    }

    /// Build the request envelope for sequence number `seq`.
    #[must_use]
    pub fn into_request(self, seq: i64) -> RequestMessage {
        RequestMessage {
            seq,
            command: self.name().to_owned(),
            arguments: self.arguments(),
        }
    }
}

/// Body of a `stackTrace` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceBody {
    /// Frames, innermost first.
    #[serde(default)]
    pub stack_frames: Vec<StackFrame>,
    /// Total frames available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<i64>,
}

/// One stack frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Frame id used for `scopes`.
    pub id: i64,
    /// Function name.
    #[serde(default)]
    pub name: String,
    /// Source of the frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// 1-based line.
    #[serde(default)]
    pub line: i64,
    /// 1-based column.
    #[serde(default)]
    pub column: i64,
}

/// Body of a `scopes` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopesBody {
    /// Scopes of the frame.
    #[serde(default)]
    pub scopes: Vec<Scope>,
}

/// A named group of variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    /// Scope name, e.g. `Locals` or `Witness Map`.
    pub name: String,
    /// Reference passed to `variables`.
    pub variables_reference: i64,
    /// Whether fetching is expensive.
    #[serde(default)]
    pub expensive: bool,
}

/// Body of a `variables` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariablesBody {
    /// Variables of the reference.
    #[serde(default)]
    pub variables: Vec<Variable>,
}

/// A named runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    /// Variable or witness name.
    pub name: String,
    /// Rendered value.
    pub value: String,
    /// Type, when the adapter reports one.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Non-zero when the value has children.
    #[serde(default)]
    pub variables_reference: i64,
}

/// Body of a `setBreakpoints` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetBreakpointsBody {
    /// One entry per requested breakpoint, in request order.
    #[serde(default)]
    pub breakpoints: Vec<Breakpoint>,
}

/// Verification outcome for a requested breakpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    /// Adapter-assigned id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Whether the adapter could place the breakpoint.
    pub verified: bool,
    /// Why the breakpoint was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Actual line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,
    /// Actual column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
}

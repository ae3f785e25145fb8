use crate::conditional::{ConditionalEngine, ControlFlowError};
use crate::error::ErrorKind;
use crate::events::{Event, EventSink, TracingSink};
use crate::instruction::{Instruction, InstructionKind, Playbook};
use crate::login::{Credentials, LoginProbe, LoginState};
use crate::pagination::PaginationHandler;
use crate::parser::ParseError;
use crate::progress::{block_of, plan_blocks};
use crate::session::{Expectation, PollSettings, SessionReader};
use crate::transport::{Transport, TransportError};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Enter, Ctrl+C, Enter, each followed by a settle delay.
const INIT_SEQUENCE: &[(&[u8], Duration)] = &[
    (b"\n", Duration::from_millis(200)),
    (b"\x03", Duration::from_millis(200)),
    (b"\n", Duration::from_secs(1)),
];

pub const DEFAULT_SUCCESS_MESSAGE: &str = "Playbook completed successfully";

/// What to do when a `WAIT` times out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Stop the run.
    #[default]
    Abort,
    /// Keep going; the result still reports the timeout.
    Continue,
    /// Read again up to this many more times, then abort.
    Retry(u32),
}

/// Settings for one [`Executor`].
///
/// The default performs no initialization, no initial read and no login probe;
/// [`Config::run_options`](crate::Config::run_options) turns them on.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub wait_timeout: Duration,
    pub login_wait_timeout: Duration,
    /// Fallback prompt used until one is detected.
    pub prompt_symbol: String,
    pub line_terminator: String,
    pub init_sequence: bool,
    /// How long to read a banner before the script starts. Zero disables it.
    pub initial_read: Duration,
    pub login_probe: Option<LoginProbe>,
    pub pagination: PaginationHandler,
    pub poll: PollSettings,
    pub on_timeout: TimeoutPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(30),
            login_wait_timeout: Duration::from_secs(10),
            prompt_symbol: ">".to_string(),
            line_terminator: "\n".to_string(),
            init_sequence: false,
            initial_read: Duration::ZERO,
            login_probe: None,
            pagination: PaginationHandler::default(),
            poll: PollSettings::default(),
            on_timeout: TimeoutPolicy::Abort,
        }
    }
}

/// Why a run did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: ErrorKind,
    pub source_line: Option<usize>,
    pub message: String,
    /// Output received before a timeout.
    pub partial_output: Option<String>,
}

impl Failure {
    fn at_line(mut self, line: usize) -> Self {
        self.source_line = Some(line);
        self
    }
}

impl From<TransportError> for Failure {
    fn from(err: TransportError) -> Self {
        Failure {
            kind: ErrorKind::from(&err),
            source_line: None,
            message: err.to_string(),
            partial_output: None,
        }
    }
}

impl From<ControlFlowError> for Failure {
    fn from(err: ControlFlowError) -> Self {
        Failure {
            kind: ErrorKind::from(&err),
            source_line: err.line(),
            message: err.to_string(),
            partial_output: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    /// Steps executed or bypassed by branching. Equal to `total_steps` on success.
    pub completed_steps: usize,
    pub total_steps: usize,
    pub failure: Option<Failure>,
    /// Message of the last `SUCCESS` actually executed.
    pub custom_success_message: Option<String>,
    pub detected_prompt: Option<String>,
    pub last_output: String,
    /// Login steps skipped because the console was already authenticated.
    pub skipped_login_steps: usize,
}

impl ExecutionResult {
    /// The result of a playbook rejected before any transport I/O.
    pub fn syntax_failure(err: &ParseError) -> Self {
        ExecutionResult {
            success: false,
            completed_steps: 0,
            total_steps: 0,
            failure: Some(Failure {
                kind: ErrorKind::from(err),
                source_line: err.line(),
                message: err.to_string(),
                partial_output: None,
            }),
            custom_success_message: None,
            detected_prompt: None,
            last_output: String::new(),
            skipped_login_steps: 0,
        }
    }

    pub fn failure_reason(&self) -> Option<ErrorKind> {
        self.failure.as_ref().map(|failure| failure.kind)
    }

    /// The custom success message, or the default one.
    pub fn success_message(&self) -> &str {
        self.custom_success_message
            .as_deref()
            .unwrap_or(DEFAULT_SUCCESS_MESSAGE)
    }
}

/// Mutable state of one run.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    pub instruction_pointer: usize,
    /// Cleaned output of the most recent `WAIT`; conditions test against it.
    pub last_output: String,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub success_message: Option<String>,
}

fn count_steps(instructions: &[Instruction]) -> usize {
    instructions
        .iter()
        .filter(|instruction| instruction.kind.is_executable())
        .count()
}

/// Runs playbooks against a transport
pub struct Executor<'a> {
    options: RunOptions,
    sink: Box<dyn EventSink + 'a>,
}

impl<'a> Executor<'a> {
    /// Create an executor that reports events through `tracing`
    pub fn new(options: RunOptions) -> Self {
        Self::with_handler(options, TracingSink)
    }

    /// Create an executor that reports events to `sink`
    ///
    /// Closures work as sinks:
    ///
    /// ```no_run
    /// use seriallink::{Event, Executor, RunOptions};
    ///
    /// let executor = Executor::with_handler(RunOptions::default(), |event: &Event| {
    ///     if let Event::StepStarted { step, total, description, .. } = event {
    ///         eprintln!("[{step}/{total}] {description}");
    ///     }
    /// });
    /// # let _ = executor;
    /// ```
    pub fn with_handler(options: RunOptions, sink: impl EventSink + 'a) -> Self {
        Executor {
            options,
            sink: Box::new(sink),
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Execute `playbook` over `transport`.
    ///
    /// Never panics on device behavior; every failure is reported in the result.
    pub async fn run(
        &mut self,
        playbook: &Playbook,
        transport: &mut dyn Transport,
        credentials: Option<&Credentials>,
    ) -> ExecutionResult {
        let instructions = playbook.instructions();
        let mut reader = SessionReader::new(self.options.prompt_symbol.clone())
            .with_pagination(self.options.pagination.clone())
            .with_poll_settings(self.options.poll.clone());
        let mut ctx = ExecutionContext::default();

        let start = match self
            .prepare(instructions, transport, credentials, &mut reader)
            .await
        {
            Ok(start) => start,
            Err(failure) => {
                ctx.total_steps = count_steps(instructions);
                return self.finish(ctx, Some(failure), &reader, 0);
            }
        };
        let skipped = count_steps(&instructions[..start]);

        ctx.instruction_pointer = start;
        ctx.total_steps = count_steps(&instructions[start..]);
        let login_end = if start > 0 {
            Some(start)
        } else {
            self.options
                .login_probe
                .clone()
                .unwrap_or_default()
                .login_block_end(instructions)
        };
        let blocks = plan_blocks(instructions, login_end);
        let mut engine = ConditionalEngine::new();
        let mut deferred: Option<Failure> = None;

        while ctx.instruction_pointer < instructions.len() {
            let index = ctx.instruction_pointer;
            let instruction = &instructions[index];
            if !instruction.kind.is_executable() {
                ctx.instruction_pointer += 1;
                continue;
            }
            let step = ctx.completed_steps + 1;
            let line = instruction.source_line;
            self.emit(Event::StepStarted {
                step,
                total: ctx.total_steps,
                line,
                block: block_of(&blocks, index).map(|block| block.label.clone()),
                description: describe_step(instruction, &reader),
            });

            match self
                .execute_step(instructions, index, transport, &mut reader, &mut engine, &mut ctx)
                .await
            {
                Ok(next) => {
                    self.emit(Event::StepSucceeded { step, line });
                    let bypassed = instructions.get(index + 1..next).map_or(0, count_steps);
                    ctx.completed_steps += 1 + bypassed;
                    ctx.instruction_pointer = next;
                }
                Err(failure) => {
                    self.emit(Event::StepFailed {
                        step,
                        line,
                        kind: failure.kind,
                        message: failure.message.clone(),
                    });
                    if !failure.kind.is_fatal()
                        && self.options.on_timeout == TimeoutPolicy::Continue
                    {
                        warn!(line, "continuing after timeout");
                        deferred.get_or_insert(failure);
                        ctx.completed_steps += 1;
                        ctx.instruction_pointer = index + 1;
                        continue;
                    }
                    return self.finish(ctx, Some(failure), &reader, skipped);
                }
            }
        }

        self.finish(ctx, deferred, &reader, skipped)
    }

    /// Run one instruction and return the index of the next one.
    async fn execute_step(
        &mut self,
        instructions: &[Instruction],
        index: usize,
        transport: &mut dyn Transport,
        reader: &mut SessionReader,
        engine: &mut ConditionalEngine,
        ctx: &mut ExecutionContext,
    ) -> Result<usize, Failure> {
        let instruction = &instructions[index];
        let line = instruction.source_line;
        match instruction.kind {
            InstructionKind::Send => {
                reader
                    .send_line(transport, &instruction.argument, &self.options.line_terminator)
                    .await
                    .map_err(|err| Failure::from(err).at_line(line))?;
                Ok(index + 1)
            }
            InstructionKind::Wait => {
                self.wait(instruction, transport, reader, ctx).await?;
                Ok(index + 1)
            }
            InstructionKind::Pause => {
                let duration = instruction.pause_duration().unwrap_or_default();
                sleep(duration).await;
                Ok(index + 1)
            }
            InstructionKind::Success => {
                if !instruction.argument.is_empty() {
                    ctx.success_message = Some(instruction.argument.clone());
                }
                Ok(index + 1)
            }
            InstructionKind::Comment => Ok(index + 1),
            kind => {
                let transition = engine.step(instructions, index, &ctx.last_output)?;
                if let Some(err) = &transition.recovered {
                    self.emit(Event::ConditionError {
                        line,
                        kind: ErrorKind::from(err),
                        message: err.to_string(),
                    });
                }
                if let Some(result) = transition.result {
                    self.emit(Event::ConditionEvaluated {
                        line,
                        keyword: kind.keyword(),
                        pattern: instruction.argument.clone(),
                        result,
                    });
                }
                Ok(transition.next)
            }
        }
    }

    async fn wait(
        &mut self,
        instruction: &Instruction,
        transport: &mut dyn Transport,
        reader: &mut SessionReader,
        ctx: &mut ExecutionContext,
    ) -> Result<(), Failure> {
        let line = instruction.source_line;
        let expected = Expectation::from_argument(&instruction.argument);
        let timeout = instruction.timeout.unwrap_or(self.options.wait_timeout);
        let retries = match self.options.on_timeout {
            TimeoutPolicy::Retry(retries) => retries,
            _ => 0,
        };
        let previous_prompt = reader.detected_prompt().map(str::to_string);

        let mut attempt = 0;
        let outcome = loop {
            let outcome = reader
                .read_until(transport, &expected, timeout)
                .await
                .map_err(|err| Failure::from(err).at_line(line))?;
            if outcome.satisfied || attempt >= retries {
                break outcome;
            }
            attempt += 1;
            info!(line, attempt, retries, "retrying wait for {expected}");
        };

        self.announce_prompt(reader, previous_prompt.as_deref());
        ctx.last_output = outcome.output.clone();
        if !outcome.output.is_empty() {
            self.emit(Event::Output {
                line,
                text: outcome.output,
            });
        }

        if outcome.satisfied {
            return Ok(());
        }
        Err(Failure {
            kind: ErrorKind::Timeout,
            source_line: Some(line),
            message: format!(
                "Timed out after {:.1}s waiting for {expected}",
                timeout.as_secs_f64()
            ),
            partial_output: Some(outcome.raw),
        })
    }

    /// Initialization, banner read and login handling. Returns the index to start at.
    async fn prepare(
        &mut self,
        instructions: &[Instruction],
        transport: &mut dyn Transport,
        credentials: Option<&Credentials>,
        reader: &mut SessionReader,
    ) -> Result<usize, Failure> {
        if self.options.init_sequence {
            debug!("sending console initialization sequence");
            for (bytes, settle) in INIT_SEQUENCE {
                reader.write_raw(transport, bytes).await?;
                sleep(*settle).await;
            }
        }

        if !self.options.initial_read.is_zero() {
            let banner = reader
                .collect_for(transport, self.options.initial_read)
                .await?;
            debug!(bytes = banner.len(), "initial read complete");
            let previous = reader.detected_prompt().map(str::to_string);
            if reader.detect_prompt().is_none() {
                warn!(
                    fallback = %self.options.prompt_symbol,
                    "could not detect the prompt, using the fallback symbol"
                );
            }
            self.announce_prompt(reader, previous.as_deref());
        }

        let probe = self.options.login_probe.clone();
        let logged_in = match &probe {
            Some(probe) => self.probe_login(probe, transport, reader).await? == LoginState::LoggedIn,
            None => false,
        };
        let login_end = probe.unwrap_or_default().login_block_end(instructions);

        if logged_in {
            return Ok(self.skip_login_block(instructions, login_end));
        }
        if let Some(credentials) = credentials {
            self.login(credentials, transport, reader).await?;
            return Ok(self.skip_login_block(instructions, login_end));
        }
        Ok(0)
    }

    async fn probe_login(
        &mut self,
        probe: &LoginProbe,
        transport: &mut dyn Transport,
        reader: &mut SessionReader,
    ) -> Result<LoginState, Failure> {
        let mut state = LoginState::Unknown;
        for probe_line in &probe.probe_lines {
            let data = format!("{probe_line}{}", self.options.line_terminator);
            reader.write_raw(transport, data.as_bytes()).await?;
            let response = reader.collect_for(transport, probe.settle).await?;

            let previous = reader.detected_prompt().map(str::to_string);
            reader.detect_prompt();
            self.announce_prompt(reader, previous.as_deref());

            state = probe.assess(&response, reader.detected_prompt());
            debug!(probe = %probe_line, ?state, "login probe");
            if state != LoginState::Unknown {
                break;
            }
        }
        info!(?state, "login state");
        Ok(state)
    }

    async fn login(
        &mut self,
        credentials: &Credentials,
        transport: &mut dyn Transport,
        reader: &mut SessionReader,
    ) -> Result<(), Failure> {
        info!(username = %credentials.username, "logging in");
        let terminator = self.options.line_terminator.clone();
        let username_prompt = Expectation::Text(credentials.username_prompt.clone());
        let password_prompt = Expectation::Text(credentials.password_prompt.clone());

        self.expect_login(reader, transport, &username_prompt).await?;
        reader
            .send_line(transport, &credentials.username, &terminator)
            .await?;
        self.expect_login(reader, transport, &password_prompt).await?;
        reader
            .send_line(transport, &credentials.password, &terminator)
            .await?;

        let previous = reader.detected_prompt().map(str::to_string);
        self.expect_login(reader, transport, &Expectation::Prompt).await?;
        self.announce_prompt(reader, previous.as_deref());
        Ok(())
    }

    async fn expect_login(
        &mut self,
        reader: &mut SessionReader,
        transport: &mut dyn Transport,
        expected: &Expectation,
    ) -> Result<(), Failure> {
        let outcome = reader
            .read_until(transport, expected, self.options.login_wait_timeout)
            .await?;
        if outcome.satisfied {
            return Ok(());
        }
        Err(Failure {
            kind: ErrorKind::Timeout,
            source_line: None,
            message: format!("Login failed: timed out waiting for {expected}"),
            partial_output: Some(outcome.raw),
        })
    }

    fn skip_login_block(&mut self, instructions: &[Instruction], login_end: Option<usize>) -> usize {
        let Some(end) = login_end else {
            return 0;
        };
        let steps = count_steps(&instructions[..end]);
        self.emit(Event::LoginSkipped { steps });
        end
    }

    fn announce_prompt(&mut self, reader: &SessionReader, previous: Option<&str>) {
        if let Some(prompt) = reader.detected_prompt() {
            if Some(prompt) != previous {
                self.emit(Event::PromptDetected {
                    prompt: prompt.to_string(),
                });
            }
        }
    }

    fn finish(
        &mut self,
        ctx: ExecutionContext,
        failure: Option<Failure>,
        reader: &SessionReader,
        skipped_login_steps: usize,
    ) -> ExecutionResult {
        let result = ExecutionResult {
            success: failure.is_none(),
            completed_steps: ctx.completed_steps,
            total_steps: ctx.total_steps,
            failure,
            custom_success_message: ctx.success_message,
            detected_prompt: reader.detected_prompt().map(str::to_string),
            last_output: ctx.last_output,
            skipped_login_steps,
        };
        self.emit(Event::RunFinished {
            success: result.success,
            completed: result.completed_steps,
            total: result.total_steps,
        });
        result
    }

    fn emit(&mut self, event: Event) {
        self.sink.handle(&event);
    }
}

fn describe_step(instruction: &Instruction, reader: &SessionReader) -> String {
    let argument = &instruction.argument;
    match instruction.kind {
        InstructionKind::Send if argument.is_empty() => "Sending newline".to_string(),
        InstructionKind::Send => format!("Sending '{argument}'"),
        InstructionKind::Wait => match Expectation::from_argument(argument) {
            Expectation::Prompt => {
                format!("Waiting for prompt '{}'", reader.active_prompt().trim())
            }
            Expectation::Text(text) => format!("Waiting for '{text}'"),
        },
        InstructionKind::Pause => format!("Pausing {argument}s"),
        InstructionKind::Success => "Recording success message".to_string(),
        kind if kind.is_if() || kind.is_elif() => format!("{} '{argument}'", kind.keyword()),
        kind => kind.keyword().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;
    use crate::transport::ScriptedTransport;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    fn options() -> RunOptions {
        RunOptions {
            wait_timeout: Duration::from_millis(300),
            pagination: PaginationHandler::new().with_response_delay(Duration::ZERO),
            ..RunOptions::default()
        }
    }

    fn device() -> ScriptedTransport {
        ScriptedTransport::new()
            .on_line("show version", "Model: SN2700\nswitch# ")
            .on_line("show interfaces", "Eth1/1 up\nswitch# ")
    }

    #[tokio::test]
    async fn test_counts_bypassed_steps() {
        let playbook = parse_str(
            "SEND \"show version\"\nWAIT PROMPT\nIF_CONTAINS nothing\nSEND a\nSEND b\nELSE\nSEND c\nENDIF\n",
        )
        .unwrap();
        let mut transport = device();
        let result = Executor::new(options())
            .run(&playbook, &mut transport, None)
            .await;
        assert!(result.success, "{:?}", result.failure);
        assert_eq!(result.total_steps, 8);
        assert_eq!(result.completed_steps, 8);
        assert_eq!(transport.written_lines(), vec!["show version", "c"]);
    }

    #[tokio::test]
    async fn test_success_in_skipped_branch_not_recorded() {
        let playbook = parse_str(
            "SEND \"show version\"\nWAIT PROMPT\nIF_CONTAINS nothing\nSUCCESS skipped\nELSE\nSUCCESS taken\nENDIF\n",
        )
        .unwrap();
        let mut transport = device();
        let result = Executor::new(options())
            .run(&playbook, &mut transport, None)
            .await;
        assert_eq!(result.custom_success_message.as_deref(), Some("taken"));
        assert_eq!(result.success_message(), "taken");
    }

    #[tokio::test]
    async fn test_timeout_aborts() {
        let playbook = parse_str("SEND \"show version\"\nWAIT \"XYZ\"\nSEND never\n").unwrap();
        let mut transport = device();
        let result = Executor::new(options())
            .run(&playbook, &mut transport, None)
            .await;
        assert!(!result.success);
        assert_eq!(result.failure_reason(), Some(ErrorKind::Timeout));
        let failure = result.failure.unwrap();
        assert_eq!(failure.source_line, Some(2));
        assert!(failure.partial_output.unwrap().contains("SN2700"));
        assert_eq!(result.completed_steps, 1);
        assert_eq!(result.last_output, "Model: SN2700\nswitch#");
        assert_eq!(transport.written_lines(), vec!["show version"]);
    }

    #[tokio::test]
    async fn test_timeout_continue_policy() {
        let playbook = parse_str("WAIT \"XYZ\" 50ms\nSEND after\nSUCCESS done\n").unwrap();
        let mut transport = ScriptedTransport::new();
        let options = RunOptions {
            on_timeout: TimeoutPolicy::Continue,
            ..options()
        };
        let result = Executor::new(options)
            .run(&playbook, &mut transport, None)
            .await;
        assert!(!result.success);
        assert_eq!(result.failure_reason(), Some(ErrorKind::Timeout));
        assert_eq!(result.completed_steps, 3);
        assert_eq!(result.custom_success_message.as_deref(), Some("done"));
        assert_eq!(transport.written_lines(), vec!["after"]);
    }

    /// Prints `text` only after a number of empty polls.
    struct SlowDevice {
        polls_left: usize,
        text: Vec<u8>,
    }

    #[async_trait(?Send)]
    impl Transport for SlowDevice {
        async fn write(&mut self, _data: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        fn read_nonblocking(&mut self) -> Result<Vec<u8>, TransportError> {
            if self.polls_left > 0 {
                self.polls_left -= 1;
                return Ok(Vec::new());
            }
            Ok(std::mem::take(&mut self.text))
        }

        fn bytes_available(&mut self) -> bool {
            self.polls_left == 0 && !self.text.is_empty()
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_retry_policy() {
        let playbook = parse_str("WAIT \"ready\" 30ms\n").unwrap();
        let poll = PollSettings {
            busy_sleep: Duration::from_millis(10),
            idle_sleep: Duration::from_millis(10),
            idle_after: 1,
        };

        let mut transport = SlowDevice {
            polls_left: 8,
            text: b"ready".to_vec(),
        };
        let abort = RunOptions {
            poll: poll.clone(),
            ..options()
        };
        let result = Executor::new(abort)
            .run(&playbook, &mut transport, None)
            .await;
        assert_eq!(result.failure_reason(), Some(ErrorKind::Timeout));

        let mut transport = SlowDevice {
            polls_left: 8,
            text: b"ready".to_vec(),
        };
        let retry = RunOptions {
            poll,
            on_timeout: TimeoutPolicy::Retry(10),
            ..options()
        };
        let result = Executor::new(retry)
            .run(&playbook, &mut transport, None)
            .await;
        assert!(result.success, "{:?}", result.failure);
    }

    #[tokio::test]
    async fn test_transport_failure_is_fatal() {
        let playbook = parse_str("SEND hello\nSEND again\n").unwrap();
        let mut transport = ScriptedTransport::new().failing_writes();
        let result = Executor::new(options())
            .run(&playbook, &mut transport, None)
            .await;
        assert_eq!(result.failure_reason(), Some(ErrorKind::Transport));
        assert_eq!(result.failure.unwrap().source_line, Some(1));
        assert_eq!(result.completed_steps, 0);
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let playbook = parse_str("SEND \"show version\"\nWAIT PROMPT\nIF_REGEX \"sn[0-9]+\"\nENDIF\n").unwrap();
        let mut transport = device();
        let mut events = Vec::new();
        let result = Executor::with_handler(options(), |event: &Event| events.push(event.clone()))
            .run(&playbook, &mut transport, None)
            .await;
        assert!(result.success);
        assert!(events.contains(&Event::PromptDetected {
            prompt: "switch# ".to_string()
        }));
        assert!(events.contains(&Event::ConditionEvaluated {
            line: 3,
            keyword: "IF_REGEX",
            pattern: "sn[0-9]+".to_string(),
            result: true,
        }));
        assert_eq!(
            events.last(),
            Some(&Event::RunFinished {
                success: true,
                completed: 4,
                total: 4
            })
        );
    }

    #[tokio::test]
    async fn test_invalid_regex_reported_to_sink() {
        let playbook = parse_str(
            "SEND \"show version\"\nWAIT PROMPT\nIF_REGEX \"([\"\nSUCCESS matched\nELSE\nSUCCESS fallback\nENDIF\n",
        )
        .unwrap();
        let mut transport = device();
        let mut events = Vec::new();
        let result = Executor::with_handler(options(), |event: &Event| events.push(event.clone()))
            .run(&playbook, &mut transport, None)
            .await;
        assert!(result.success, "{:?}", result.failure);
        assert_eq!(result.success_message(), "fallback");

        let reported: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                Event::ConditionError {
                    line,
                    kind,
                    message,
                } => Some((*line, *kind, message.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].0, 3);
        assert_eq!(reported[0].1, ErrorKind::ConditionEvaluation);
        assert!(reported[0].2.contains("(["), "{}", reported[0].2);
        assert!(events.contains(&Event::ConditionEvaluated {
            line: 3,
            keyword: "IF_REGEX",
            pattern: "([".to_string(),
            result: false,
        }));
    }

    /// Answers the first write with output split into bursts; an empty burst is a
    /// quiet poll.
    struct Bursts {
        answered: bool,
        chunks: VecDeque<Vec<u8>>,
    }

    impl Bursts {
        fn new(chunks: &[&[u8]]) -> Self {
            Bursts {
                answered: false,
                chunks: chunks.iter().map(|chunk| chunk.to_vec()).collect(),
            }
        }
    }

    #[async_trait(?Send)]
    impl Transport for Bursts {
        async fn write(&mut self, _data: &[u8]) -> Result<(), TransportError> {
            self.answered = true;
            Ok(())
        }

        fn read_nonblocking(&mut self) -> Result<Vec<u8>, TransportError> {
            if !self.answered {
                return Ok(Vec::new());
            }
            Ok(self.chunks.pop_front().unwrap_or_default())
        }

        fn bytes_available(&mut self) -> bool {
            self.answered && self.chunks.front().is_some_and(|chunk| !chunk.is_empty())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_prompt_wait_survives_label_line_at_chunk_boundary() {
        let playbook = parse_str(
            "SEND \"show inventory\"\nWAIT PROMPT\nIF_CONTAINS \"MT1234\"\nSUCCESS found\nELSE\nSUCCESS missing\nENDIF\n",
        )
        .unwrap();
        let mut transport = Bursts::new(&[
            &b"Model: SN2700\r\nSerial Number:"[..],
            &b""[..],
            &b""[..],
            &b""[..],
            &b" MT1234\r\nswitch# "[..],
        ]);
        let result = Executor::new(options())
            .run(&playbook, &mut transport, None)
            .await;
        assert!(result.success, "{:?}", result.failure);
        assert_eq!(result.success_message(), "found");
        assert_eq!(result.detected_prompt.as_deref(), Some("switch# "));
        assert_eq!(result.last_output, "Model: SN2700\nSerial Number: MT1234");
    }

    #[tokio::test]
    async fn test_init_sequence_and_initial_read() {
        let playbook = parse_str("SUCCESS ok\n").unwrap();
        let mut transport = ScriptedTransport::new().with_banner("Welcome\nleaf01# ");
        let options = RunOptions {
            init_sequence: true,
            initial_read: Duration::from_millis(20),
            ..options()
        };
        let result = Executor::new(options)
            .run(&playbook, &mut transport, None)
            .await;
        assert!(result.success);
        assert_eq!(transport.written(), b"\n\x03\n");
        assert_eq!(result.detected_prompt.as_deref(), Some("leaf01# "));
    }

    #[tokio::test]
    async fn test_builtin_login_with_credentials() {
        let playbook = parse_str(
            "WAIT \"login:\"\nSEND admin\nWAIT \"Password:\"\nSEND secret\nWAIT PROMPT\nSEND \"show version\"\nWAIT PROMPT\n",
        )
        .unwrap();
        let mut transport = device()
            .with_banner("switch login: ")
            .on_line("operator", "Password: ")
            .on_line("pw", "\nswitch# ");
        let credentials = Credentials::new("operator", "pw");
        let result = Executor::new(options())
            .run(&playbook, &mut transport, Some(&credentials))
            .await;
        assert!(result.success, "{:?}", result.failure);
        assert_eq!(result.skipped_login_steps, 5);
        assert_eq!(result.total_steps, 2);
        assert_eq!(
            transport.written_lines(),
            vec!["operator", "pw", "show version"]
        );
    }

    #[tokio::test]
    async fn test_login_timeout_reported() {
        let playbook = parse_str("SEND x\n").unwrap();
        let mut transport = ScriptedTransport::new();
        let options = RunOptions {
            login_wait_timeout: Duration::from_millis(50),
            ..options()
        };
        let credentials = Credentials::new("admin", "pw");
        let result = Executor::new(options)
            .run(&playbook, &mut transport, Some(&credentials))
            .await;
        assert_eq!(result.failure_reason(), Some(ErrorKind::Timeout));
        assert_eq!(result.completed_steps, 0);
        assert!(transport.written().is_empty());
    }

    #[test]
    fn test_syntax_failure_result() {
        let err = parse_str("BOGUS\n").unwrap_err();
        let result = ExecutionResult::syntax_failure(&err);
        assert!(!result.success);
        assert_eq!(result.failure_reason(), Some(ErrorKind::Syntax));
        assert_eq!(result.failure.unwrap().source_line, Some(1));
    }
}

use crate::command::{CommandFactory, Context, ExitCode};
use crate::config::Config;
use crate::env::Environment;
use crate::supervisor::Supervisor;
use crate::tokenizer::{self, Invocation};
use crate::watcher::ChildNotice;
use crossbeam_channel::{Receiver, Sender, bounded, never, select};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::Write;
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

/// Factory allows creating instances of ExecutableCommand.
///
/// Only supports commands defined in this crate: builtins and ExternalCommand.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// The default command tables, tried in order:
/// - built-ins taking arguments: `cd`, `query`
/// - built-ins without arguments: `show`, `clear`, `exit`
/// - any program found on `PATH`, launched as a tracked child
pub fn default_commands() -> Vec<Box<dyn CommandFactory>> {
    use crate::builtin::*;
    use crate::external::ExternalCommand;
    vec![
        Box::new(Factory::<Cd>::default()),
        Box::new(Factory::<Query>::default()),
        Box::new(Factory::<Show>::default()),
        Box::new(Factory::<Clear>::default()),
        Box::new(Factory::<Exit>::default()),
        Box::new(Factory::<ExternalCommand>::default()),
    ]
}

/// The shell's controller.
///
/// The interpreter owns the [`Environment`], the command tables and the
/// [`Supervisor`]. Everything that touches the process table runs on the
/// thread that calls into the interpreter.
///
/// Example
/// ```no_run
/// use shell_supervisor::Interpreter;
/// let mut sh = Interpreter::default();
/// let code = sh.execute_line("echo hello world").unwrap();
/// assert_eq!(code, Some(0));
/// ```
pub struct Interpreter {
    env: Environment,
    commands: Vec<Box<dyn CommandFactory>>,
    supervisor: Supervisor,
    notices: Receiver<ChildNotice>,
    sweep_interval: Duration,
}

enum Input {
    Line(String),
    Interrupted,
    Eof,
    Failed(String),
}

impl Interpreter {
    /// Create a new interpreter with a custom set of command factories.
    pub fn new(config: &Config, commands: Vec<Box<dyn CommandFactory>>) -> Self {
        let env = Environment::new();
        let supervisor = Supervisor::new(config, env.search_path());
        Self {
            env,
            commands,
            supervisor,
            notices: never(),
            sweep_interval: config.sweep_interval,
        }
    }

    /// React to the child watcher's notices instead of waiting for the sweep.
    pub fn with_notices(mut self, notices: Receiver<ChildNotice>) -> Self {
        self.supervisor = self.supervisor.with_notices(notices.clone());
        self.notices = notices;
        self
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Reconcile the process table now.
    pub fn reconcile(&mut self) {
        self.supervisor.reap();
    }

    /// Parse and run one input line; `None` if the line held no command.
    pub fn execute_line(&mut self, line: &str) -> anyhow::Result<Option<ExitCode>> {
        match tokenizer::parse_line(line) {
            Some(invocation) => self.run(&invocation, &mut std::io::stdout()).map(Some),
            None => Ok(None),
        }
    }

    /// Run a single invocation, writing builtin output to `stdout`.
    ///
    /// Returns the command's exit code or an error if no table knows the
    /// command or it fails to execute.
    pub fn run(
        &mut self,
        invocation: &Invocation,
        stdout: &mut dyn Write,
    ) -> anyhow::Result<ExitCode> {
        let cmd = self
            .commands
            .iter()
            .find_map(|factory| factory.try_create(&self.env, &invocation.tokens))
            .ok_or_else(|| anyhow::anyhow!("Command not supported."))?;

        let mut ctx = Context {
            env: &mut self.env,
            supervisor: &mut self.supervisor,
            mode: invocation.mode,
            redirect: invocation.redirect,
        };
        let code = cmd.execute(stdout, &mut ctx);
        self.supervisor.reap();
        code
    }

    /// Interactive loop: prompt, run, repeat until `exit` or end of input.
    ///
    /// Line editing happens on its own thread so terminated children are
    /// reconciled (and relaunched) while the prompt is waiting.
    pub fn repl(&mut self) -> anyhow::Result<()> {
        let (prompt_tx, prompt_rx) = bounded::<String>(1);
        let (input_tx, input_rx) = bounded::<Input>(1);
        let editor = thread::Builder::new()
            .name("line-editor".into())
            .spawn(move || read_lines(prompt_rx, input_tx))?;
        let notices = self.notices.clone();

        while !self.env.should_exit {
            if prompt_tx.send(self.env.prompt()).is_err() {
                break;
            }
            let input = loop {
                let ready = select! {
                    recv(input_rx) -> input => Some(input.ok()),
                    recv(notices) -> _ => None,
                    default(self.sweep_interval) => None,
                };
                match ready {
                    Some(input) => break input,
                    None => self.reconcile(),
                }
            };
            match input {
                Some(Input::Line(line)) => match self.execute_line(&line) {
                    Ok(code) => debug!(?code, "command finished"),
                    Err(err) => println!("{err:#}"),
                },
                Some(Input::Interrupted) => {
                    println!("Interrupted");
                    break;
                }
                Some(Input::Eof) | None => break,
                Some(Input::Failed(err)) => {
                    error!(%err, "line editor failed");
                    break;
                }
            }
        }

        println!("Exited simple shell.");
        drop(prompt_tx);
        editor
            .join()
            .map_err(|_| anyhow::anyhow!("line editor thread panicked"))
    }
}

impl Default for Interpreter {
    /// An interpreter with [`default_commands`] and [`Config::default`].
    fn default() -> Self {
        Self::new(&Config::default(), default_commands())
    }
}

fn read_lines(prompts: Receiver<String>, inputs: Sender<Input>) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(err) => {
            let _ = inputs.send(Input::Failed(err.to_string()));
            return;
        }
    };
    for prompt in prompts.iter() {
        let input = match rl.readline(&prompt) {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                Input::Line(line)
            }
            Err(ReadlineError::Interrupted) => Input::Interrupted,
            Err(ReadlineError::Eof) => Input::Eof,
            Err(err) => Input::Failed(err.to_string()),
        };
        if inputs.send(input).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::RunMode;

    fn invocation(tokens: &[&str]) -> Invocation {
        let tokens: Vec<String> = tokens.iter().map(|x| x.to_string()).collect();
        Invocation {
            redirect: crate::redirect::requested(&tokens),
            tokens,
            mode: RunMode::Foreground,
        }
    }

    #[test]
    fn unknown_command_is_not_supported() {
        let mut sh = Interpreter::default();
        let err = sh
            .run(&invocation(&["no-such-command-xyz"]), &mut Vec::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "Command not supported.");
        assert!(sh.supervisor().table().is_empty());
    }

    #[test]
    fn blank_lines_run_nothing() {
        let mut sh = Interpreter::default();
        assert_eq!(sh.execute_line("").unwrap(), None);
        assert_eq!(sh.execute_line("bg").unwrap(), None);
    }

    #[test]
    fn builtins_are_dispatched_before_path_lookup() {
        let mut sh = Interpreter::default();
        let mut out = Vec::new();
        let code = sh.run(&invocation(&["show"]), &mut out).unwrap();
        assert_eq!(code, 0);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Simple shell has not run any processes yet.\n"
        );
    }

    #[test]
    fn exit_stops_the_loop() {
        let mut sh = Interpreter::default();
        sh.run(&invocation(&["exit"]), &mut Vec::new()).unwrap();
        assert!(sh.env().should_exit);
    }

    #[test]
    fn custom_tables_restrict_commands() {
        let mut sh = Interpreter::new(&Config::default(), vec![]);
        assert!(sh.run(&invocation(&["show"]), &mut Vec::new()).is_err());
    }
}

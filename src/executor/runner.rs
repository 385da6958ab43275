use super::scheduler::TickScheduler;
use std::io::{self, BufRead, Write};
use std::thread;
use tracing::debug;

enum Prompt {
    Resume,
    Quit,
}

/// Drive `scheduler` on the calling thread until its run ends, prompting on
/// stderr whenever the debugger comes to rest.
pub fn run_interactive(scheduler: &mut TickScheduler, input: &mut impl BufRead) -> io::Result<()> {
    while scheduler.is_running() {
        if scheduler.is_at_rest() {
            if let Prompt::Quit = prompt(scheduler, input)? {
                scheduler.stop();
                break;
            }
            continue;
        }

        let Some(tick) = scheduler.take_pending_tick() else {
            break;
        };
        let wait = scheduler
            .idle_wait()
            .map_or(tick.delay, |idle| idle.max(tick.delay));
        if !wait.is_zero() {
            thread::sleep(wait);
        }
        scheduler.on_tick(tick);
    }
    Ok(())
}

fn prompt(scheduler: &mut TickScheduler, input: &mut impl BufRead) -> io::Result<Prompt> {
    loop {
        eprintln!(
            "\nCommands: (c)ontinue, (n)ext, (s)tep in, (o)ut, (b)reak <line>, (d)elete <line>, speed <x>, (q)uit"
        );
        eprint!("> ");
        io::stderr().flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(Prompt::Quit);
        }
        let Some(words) = shlex::split(line.trim()) else {
            eprintln!("❌ Unbalanced quotes");
            continue;
        };
        debug!(?words, "debugger command");

        match words.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
            [] | ["s"] | ["step"] | ["stepIn"] => {
                scheduler.step_in();
                return Ok(Prompt::Resume);
            }
            ["c"] | ["continue"] => {
                scheduler.resume();
                return Ok(Prompt::Resume);
            }
            ["n"] | ["next"] | ["stepOver"] => {
                scheduler.step_over();
                return Ok(Prompt::Resume);
            }
            ["o"] | ["out"] | ["stepOut"] => {
                scheduler.step_out();
                return Ok(Prompt::Resume);
            }
            ["q"] | ["quit"] => return Ok(Prompt::Quit),
            ["b" | "break", line] => match line.parse::<usize>() {
                Ok(line) if line > 0 => {
                    if !scheduler.breakpoints().contains(line) {
                        scheduler.toggle_breakpoint(line);
                    }
                    eprintln!("🔴 Breakpoint set at line {}", line);
                }
                _ => eprintln!("❌ Invalid line number"),
            },
            ["d" | "delete", line] => match line.parse::<usize>() {
                Ok(line) if scheduler.breakpoints().contains(line) => {
                    scheduler.toggle_breakpoint(line);
                    eprintln!("⚪ Breakpoint removed from line {}", line);
                }
                _ => eprintln!("❌ No breakpoint at {}", line),
            },
            ["speed", value] => match value.parse::<f64>() {
                Ok(speed) => {
                    scheduler.set_speed(speed);
                    eprintln!("⏱  Speed {}", scheduler.clock().speed());
                }
                Err(_) => eprintln!("❌ Invalid speed"),
            },
            _ => eprintln!("❓ Unknown command: {}", line.trim()),
        }
    }
}

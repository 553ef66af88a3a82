//! Reporterm entrypoint so configuration, voice capture, and submission run as
//! one drain loop.
//!
//! # Architecture
//!
//! - Input thread: reads stdin lines and forwards them over a channel
//! - Capture worker: records one utterance and reports it as a message
//! - Fetch worker: performs the blocking report request off the loop
//! - Main loop: drains all three sources as discrete, non-preemptive steps

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::{bounded, Sender, TryRecvError};
use std::io::{self, BufRead};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reporterm::config::{self, AppConfig};
use reporterm::controller::{ReportController, SubmissionState, SubmitDisposition};
use reporterm::doctor::build_doctor_report;
use reporterm::notify::{NotificationSink, TerminalSink};
use reporterm::report::HttpReportClient;
use reporterm::voice::{self, VoiceCaptureSession, VoiceSessionMessage};
use reporterm::{audio, init_logging, init_tracing, log_debug};

/// Drain-loop cadence; every message source is polled at this interval.
const POLL_TICK_MS: u64 = 25;

/// Max pending stdin lines before the reader thread blocks.
const INPUT_CHANNEL_CAPACITY: usize = 64;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("reporterm: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let mut config = AppConfig::parse();
    let user_config = config::load_user_config();
    config.apply_user_config(&user_config);
    config.validate()?;
    init_logging(&config);
    init_tracing(&config);
    log_debug("=== Reporterm started ===");

    if config.list_input_devices {
        return Ok(list_devices());
    }
    if config.doctor {
        println!("{}", build_doctor_report(&config).render());
        return Ok(ExitCode::SUCCESS);
    }

    let mut session = VoiceCaptureSession::new(voice::detect_engine(&config));
    let client = HttpReportClient::new(
        &config.resolved_server(),
        Duration::from_secs(config.timeout_secs),
    );
    let sink = TerminalSink::new(!config.no_color);
    let mut controller =
        ReportController::new(Arc::new(client), sink, config.resolved_output_dir());

    if let Some(prompt) = config.prompt.clone() {
        return Ok(run_once(&mut controller, &prompt));
    }
    if config.listen {
        return Ok(run_listen_once(&mut controller, &mut session));
    }
    run_interactive(&mut controller, &mut session)
}

fn list_devices() -> ExitCode {
    match audio::list_input_devices() {
        Ok(devices) => {
            println!("audio input devices ({}):", devices.len());
            for name in devices {
                println!("  - {name}");
            }
        }
        Err(err) => println!("Failed to list audio input devices: {err:#}"),
    }
    ExitCode::SUCCESS
}

/// Submit one prompt and wait for its terminal notification. The exit code
/// summarizes the outcome; the notifications themselves were already printed.
fn run_once<S: NotificationSink>(controller: &mut ReportController<S>, prompt: &str) -> ExitCode {
    if controller.submit(prompt) != SubmitDisposition::Accepted {
        return ExitCode::FAILURE;
    }
    match controller.wait_for_outcome(Duration::from_millis(POLL_TICK_MS)) {
        Some(done) if done.saved.is_some() => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}

fn run_listen_once<S: NotificationSink>(
    controller: &mut ReportController<S>,
    session: &mut VoiceCaptureSession,
) -> ExitCode {
    if !session.supported() {
        eprintln!("El reconocimiento de voz no está disponible en este equipo.");
        return ExitCode::FAILURE;
    }
    println!("Escuchando... habla ahora.");
    session.start_listening();
    loop {
        if let Some(message) = session.poll() {
            return match message {
                VoiceSessionMessage::Transcript { text } => {
                    println!("» {text}");
                    run_once(controller, &text)
                }
                VoiceSessionMessage::Ended | VoiceSessionMessage::Error(_) => {
                    // Capture problems are recovered locally and logged; the
                    // user just sees that nothing was dictated.
                    println!("No se detectó ningún comando.");
                    ExitCode::FAILURE
                }
            };
        }
        thread::sleep(Duration::from_millis(POLL_TICK_MS));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LineCommand {
    Quit,
    VoiceToggle,
    Submit(String),
}

fn parse_line(line: &str) -> LineCommand {
    match line.trim() {
        "/salir" | "/exit" | "/quit" => LineCommand::Quit,
        "/voz" | "/voice" => LineCommand::VoiceToggle,
        _ => LineCommand::Submit(line.to_string()),
    }
}

fn spawn_stdin_reader(tx: Sender<String>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    })
}

fn print_welcome(voice_supported: bool) {
    println!("Dime qué reporte necesitas. Ejemplos:");
    println!("  - reporte de ventas de este mes en pdf");
    println!("  - reporte de ventas del mes pasado en excel");
    println!("  - reporte agrupado por producto");
    println!("  - reporte de ventas del 10/10/2025 al 30/10/2025 por cliente");
    if voice_supported {
        println!("Comandos: /voz dicta un comando · /salir termina");
    } else {
        println!("Comandos: /salir termina");
    }
}

fn toggle_voice(session: &mut VoiceCaptureSession) {
    if !session.supported() {
        println!("El reconocimiento de voz no está disponible en este equipo.");
        return;
    }
    if session.is_listening() {
        session.stop_listening();
        println!("Captura detenida.");
    } else {
        session.start_listening();
        println!("Escuchando... habla ahora. (/voz para cancelar)");
    }
}

fn run_interactive<S: NotificationSink>(
    controller: &mut ReportController<S>,
    session: &mut VoiceCaptureSession,
) -> Result<ExitCode> {
    print_welcome(session.supported());

    let (input_tx, input_rx) = bounded(INPUT_CHANNEL_CAPACITY);
    let _reader = spawn_stdin_reader(input_tx);
    let mut stdin_open = true;

    loop {
        match input_rx.try_recv() {
            Ok(line) => match parse_line(&line) {
                LineCommand::Quit => {
                    // An accepted submission always runs to its terminal
                    // notification, even across quit.
                    if controller.submission_state() == SubmissionState::InFlight {
                        let _ = controller.wait_for_outcome(Duration::from_millis(POLL_TICK_MS));
                    }
                    break;
                }
                LineCommand::VoiceToggle => toggle_voice(session),
                LineCommand::Submit(text) => {
                    let _ = controller.submit(&text);
                }
            },
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => stdin_open = false,
        }

        if let Some(message) = session.poll() {
            match message {
                VoiceSessionMessage::Transcript { text } => {
                    println!("» {text}");
                    let _ = controller.on_voice_result(&text);
                }
                VoiceSessionMessage::Ended => println!("No se detectó ningún comando."),
                // Already logged by the session; recovery is state reset only.
                VoiceSessionMessage::Error(_) => {}
            }
        }

        let _ = controller.poll();

        if !stdin_open
            && !session.is_listening()
            && controller.submission_state() == SubmissionState::Idle
        {
            break;
        }
        thread::sleep(Duration::from_millis(POLL_TICK_MS));
    }

    log_debug("=== Reporterm exiting ===");
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_commands_are_recognized() {
        assert_eq!(parse_line("/salir"), LineCommand::Quit);
        assert_eq!(parse_line("  /exit  "), LineCommand::Quit);
        assert_eq!(parse_line("/voz"), LineCommand::VoiceToggle);
        assert_eq!(parse_line("/voice"), LineCommand::VoiceToggle);
    }

    #[test]
    fn anything_else_is_submitted_verbatim() {
        assert_eq!(
            parse_line("reporte de ventas de este mes"),
            LineCommand::Submit("reporte de ventas de este mes".to_string())
        );
        // Blank lines go through submission so validation owns the notice.
        assert_eq!(parse_line(""), LineCommand::Submit(String::new()));
        assert_eq!(parse_line("   "), LineCommand::Submit("   ".to_string()));
    }

    #[test]
    fn slash_lookalikes_are_not_commands() {
        assert_eq!(
            parse_line("/voz extra"),
            LineCommand::Submit("/voz extra".to_string())
        );
    }
}

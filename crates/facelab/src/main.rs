use anyhow::Result;
use clap::{Parser, Subcommand};
use facelab::{
    AnnotationTag, Backends, Config, Mode, SessionController, SessionEvent, Summary,
};
use facelab_core::eigen::EigenTrainer;
use facelab_core::onnx::OnnxFaceDetector;
use facelab_core::{FaceDetector, VisionError};
use facelab_hw::{FrameSource, V4lCamera};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "facelab", about = "Webcam face enrollment and recognition workstation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture enrollment samples for a subject
    Capture {
        /// Subject name; doubles as the gallery directory name
        name: String,
    },
    /// Train the recognition model over all enrolled subjects
    Train,
    /// Live face detection preview
    Detect,
    /// Live recognition against the trained model
    Recognize,
    /// List enrolled subjects and their sample counts
    List,
    /// Show configuration and gallery status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::List => list_subjects(&config),
        Commands::Status => show_status(&config),
        Commands::Capture { name } => {
            run_session(config, |c| c.start_capture(&name).map_err(Into::into)).await
        }
        Commands::Train => run_session(config, |c| c.start_training().map_err(Into::into)).await,
        Commands::Detect => run_session(config, |c| c.start_detect().map_err(Into::into)).await,
        Commands::Recognize => {
            run_session(config, |c| c.start_recognize().map_err(Into::into)).await
        }
    }
}

fn production_backends(config: &Config) -> Backends {
    let detector_model = config.detector_model_path.clone();
    Backends {
        cameras: Arc::new(|index| {
            V4lCamera::open(index).map(|c| Box::new(c) as Box<dyn FrameSource>)
        }),
        detectors: Arc::new(move || {
            let path = detector_model.to_string_lossy();
            OnnxFaceDetector::load(&path)
                .map(|d| Box::new(d) as Box<dyn FaceDetector>)
                .map_err(|e| VisionError::Detect(e.to_string()))
        }),
        trainer: Arc::new(EigenTrainer::default()),
    }
}

/// Start one workflow and drive its event stream to completion.
/// Ctrl-C requests a cooperative stop; the loop ends once the
/// controller has joined the worker and returned to idle.
async fn run_session(
    config: Config,
    start: impl FnOnce(&mut SessionController) -> Result<()>,
) -> Result<()> {
    let backends = production_backends(&config);
    let (mut controller, mut events) = SessionController::new(config, backends);
    start(&mut controller)?;

    let mut failure: Option<String> = None;
    let mut progress_decile = 0u32;
    let mut last_names: Vec<String> = Vec::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                controller.stop();
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                let terminal = event.is_terminal();
                match event {
                    SessionEvent::ModeChanged(mode) => {
                        if mode == Mode::Idle && controller.mode() == Mode::Idle {
                            break;
                        }
                    }
                    SessionEvent::Progress(fraction) => {
                        let decile = (fraction * 10.0) as u32;
                        if decile > progress_decile {
                            progress_decile = decile;
                            println!("progress: {:.0}%", fraction * 100.0);
                        }
                    }
                    SessionEvent::FrameReady(frame) => {
                        let names: Vec<String> = frame
                            .annotations
                            .iter()
                            .filter(|a| a.tag != AnnotationTag::Face)
                            .filter_map(|a| a.label.clone())
                            .collect();
                        if names != last_names {
                            if names.is_empty() {
                                println!("no match");
                            } else {
                                println!("recognized: {}", names.join(", "));
                            }
                            last_names = names;
                        }
                        tracing::debug!(faces = frame.annotations.len(), "frame");
                    }
                    SessionEvent::Completed(summary) => print_summary(&summary),
                    SessionEvent::Failed { kind, message } => {
                        failure = Some(format!("{kind:?}: {message}"));
                    }
                }
                if terminal {
                    controller.finish();
                }
            }
        }
    }

    match failure {
        Some(message) => Err(anyhow::anyhow!(message)),
        None => Ok(()),
    }
}

fn print_summary(summary: &Summary) {
    match summary {
        Summary::Capture { subject, samples } => {
            println!("captured {samples} samples for {subject}");
        }
        Summary::Training { trained: true, subjects, samples, skipped } => {
            println!("trained on {samples} samples across {subjects} subjects ({skipped} skipped)");
        }
        Summary::Training { trained: false, .. } => {
            println!("training cancelled; previous model kept");
        }
        Summary::Watch { frames } => {
            println!("session ended after {frames} frames");
        }
    }
}

fn list_subjects(config: &Config) -> Result<()> {
    let gallery = facelab_store::Gallery::new(config.data_dir.clone());
    let subjects = gallery.list_subjects()?;
    if subjects.is_empty() {
        println!("no enrolled subjects under {}", gallery.root().display());
        return Ok(());
    }
    for subject in subjects {
        let count = gallery.sample_count(&subject)?;
        println!("{subject}: {count} samples");
    }
    Ok(())
}

fn show_status(config: &Config) -> Result<()> {
    let gallery = facelab_store::Gallery::new(config.data_dir.clone());
    println!("camera index:   {}", config.camera_index);
    println!("data dir:       {}", config.data_dir.display());
    println!("model path:     {}", config.model_path.display());
    println!("detector model: {}", config.detector_model_path.display());
    println!("subjects:       {}", gallery.list_subjects()?.len());
    println!(
        "trained model:  {}",
        if config.model_path.is_file() { "present" } else { "absent" }
    );
    Ok(())
}

use clap::Parser;
use midi_macro::{
    actions::{self, Collaborators, PactlMixer, PlayerctlPlayer},
    cli::{format_device_list, validate_device, Args, DialoguerPrompt},
    logging,
    midi::{list_devices, MidiBackend, MidirBackend},
    ui, Registrar, Session, Settings,
};
use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() {
    let args = Args::parse();
    let settings = load_settings(&args);
    initialize_logging(&settings);

    let backend: Arc<dyn MidiBackend> = Arc::new(MidirBackend::new("midi-macro"));

    if args.list_devices {
        list_available_devices(backend.as_ref());
        return;
    }

    let session = create_session(&args, &settings, Arc::clone(&backend));

    if args.monitor {
        let events = session.notifications();
        thread::spawn(move || ui::run_monitor(events));
    }
    let status = session.status();
    thread::spawn(move || ui::run_status_display(status));

    if let Err(e) = session.start(build_registrar(&settings)) {
        exit_with_error(&format!("Error connecting to MIDI device: {}", e));
    }

    run_command_loop(&args, &session, backend.as_ref());
    session.close();
    // let the status display print the final line
    thread::sleep(Duration::from_millis(50));
    log::info!("Application stopped");
}

fn exit_with_error(error_msg: &str) -> ! {
    log::error!("{}", error_msg);
    eprintln!("{}", error_msg);
    std::process::exit(1);
}

fn load_settings(args: &Args) -> Settings {
    match Settings::load(args.config.as_deref()) {
        Ok(mut settings) => {
            args.apply(&mut settings);
            settings
        }
        Err(e) => exit_with_error(&format!("Error loading settings: {}", e)),
    }
}

fn initialize_logging(settings: &Settings) {
    if let Err(e) = logging::init_logger(&settings.log) {
        eprintln!("Logger initialization failed: {}", e);
    }
    log::info!("Application starting");
}

fn list_available_devices(backend: &dyn MidiBackend) {
    match list_devices(backend) {
        Ok(devices) => {
            println!("Available MIDI devices:");
            for line in format_device_list(&devices) {
                println!("  {}", line);
            }
        }
        Err(e) => {
            log::error!("Error listing MIDI devices: {}", e);
            eprintln!("Error listing MIDI devices: {}", e);
        }
    }
}

fn create_session(args: &Args, settings: &Settings, backend: Arc<dyn MidiBackend>) -> Session {
    let session = Session::new(Arc::clone(&backend), settings).with_prompt(DialoguerPrompt);
    let Some(index) = args.device else {
        return session;
    };

    let devices = match list_devices(backend.as_ref()) {
        Ok(devices) => devices,
        Err(e) => exit_with_error(&format!("Error listing MIDI devices: {}", e)),
    };
    if let Err(error_msg) = validate_device(index, &devices) {
        exit_with_error(&error_msg);
    }
    match session.with_device_index(index) {
        Ok(session) => session,
        Err(e) => exit_with_error(&format!("Error selecting MIDI device: {}", e)),
    }
}

fn build_registrar(settings: &Settings) -> Registrar {
    let collaborators = Collaborators::new(
        Arc::new(PactlMixer),
        Arc::new(PlayerctlPlayer::new(settings.media.preferred_player.clone())),
    )
    .with_tap_timeout(Duration::from_millis(settings.media.tap_timeout_ms));
    actions::registrar(settings.bindings.clone(), collaborators)
}

/// `r` reloads settings and bindings, `l` lists devices, `q` or an empty line quits.
fn run_command_loop(args: &Args, session: &Session, backend: &dyn MidiBackend) {
    println!("\nCommands: r = reload bindings, l = list devices, q = quit");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        match line.trim() {
            "" | "q" => break,
            "r" => match Settings::load(args.config.as_deref()) {
                Ok(settings) => {
                    if let Err(e) = session.reload(build_registrar(&settings)) {
                        log::error!("Reload failed: {}", e);
                        eprintln!("Reload failed: {}", e);
                    }
                }
                Err(e) => eprintln!("Error loading settings: {}", e),
            },
            "l" => list_available_devices(backend),
            other => println!("Unknown command '{}'", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use midi_macro::cli::{format_device_list, validate_device};
    use midi_macro::midi::{list_devices, MockBackend};
    use midi_macro::{Args, Settings};
    use std::path::PathBuf;

    fn backend() -> MockBackend {
        MockBackend::new(vec![
            MockBackend::device(0, "Midi Through", true, false),
            MockBackend::device(1, "MPK mini", true, false),
            MockBackend::device(2, "Midi Through", false, false),
            MockBackend::device(3, "MPK mini", false, true),
        ])
    }

    #[test]
    fn test_device_list_format() {
        let devices = list_devices(&backend()).unwrap();
        let lines = format_device_list(&devices);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "1: Mock MPK mini, input, not in use");
        assert_eq!(lines[3], "3: Mock MPK mini, output, in use");
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["midi-macro"]);
        assert!(!args.list_devices);
        assert!(!args.monitor);
        assert_eq!(args.device, None);
        assert_eq!(args.config, None);
    }

    #[test]
    fn test_args_with_device_and_config() {
        let args = Args::parse_from([
            "midi-macro",
            "--device",
            "3",
            "--config",
            "/tmp/pads.toml",
            "--monitor",
            "--slow-poll-ms",
            "20",
        ]);
        assert_eq!(args.device, Some(3));
        assert_eq!(args.config, Some(PathBuf::from("/tmp/pads.toml")));
        assert!(args.monitor);

        let mut settings = Settings::default();
        args.apply(&mut settings);
        assert_eq!(settings.router.slow_poll_interval_ms, 20);
    }

    #[test]
    fn test_list_devices_flag() {
        let args = Args::parse_from(["midi-macro", "--list-devices"]);
        assert!(args.list_devices);
    }

    #[test]
    fn test_valid_device_index() {
        let devices = list_devices(&backend()).unwrap();
        assert!(validate_device(1, &devices).is_ok());
    }

    #[test]
    fn test_invalid_device_index() {
        let devices = list_devices(&backend()).unwrap();
        let error_msg = validate_device(9, &devices).unwrap_err();
        assert!(error_msg.contains("No MIDI device with index 9"));
        assert!(error_msg.contains("0: Mock Midi Through, input, not in use"));
    }
}

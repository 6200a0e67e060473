//! a11y-input-bridge daemon
//!
//! Binds the compositor's AT-SPI capability, registers the configured key
//! grabs and reports physical key transitions until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use log::{debug, info, warn};

use a11y_input_bridge::a11y::{AccessibleRef, AtspiClient, KeyNotification};
use a11y_input_bridge::config::{GrabConfig, LogConfig};
use a11y_input_bridge::{bridge, BridgeLoop, Config, Device, KeyDefinition, KeyGrabs};

/// Print help message
fn print_help() {
    println!(
        r#"a11y-input-bridge {} - AT-SPI input bridge for the COSMIC compositor

USAGE:
    a11y-input-bridge [OPTIONS]

OPTIONS:
    -h, --help                      Print this help message
    -V, --version                   Print version information
    --init-config                   Generate the default config file
    -f, --force                     Overwrite an existing config file
    --click BUS PATH [EVENT]        Synthesize a mouse event on an accessible
                                    (EVENT defaults to b1c)

EXAMPLES:
    a11y-input-bridge                         Run the bridge
    a11y-input-bridge --init-config --force    Regenerate config
    a11y-input-bridge --click :1.42 /org/a11y/atspi/accessible/7

CONFIG FILE:
    ~/.config/a11y-input-bridge/config.toml
"#,
        env!("CARGO_PKG_VERSION")
    );
}

fn log_key(event: &KeyNotification) {
    debug!(
        "key {} code={} sym=0x{:x} mods=0x{:x} text={:?}",
        if event.pressed { "press" } else { "release" },
        event.key_code,
        event.keysym,
        event.modifiers,
        event.text
    );
}

/// Register the configured grabs, allocating virtual bits as needed
fn register_grabs(device: &mut dyn Device, grabs: &[GrabConfig]) -> KeyGrabs {
    let mut registry = KeyGrabs::new();
    for grab in grabs {
        let mut mask = grab.modifiers;
        for &key in &grab.modifier_keys {
            match device.map_modifier(key) {
                0 => warn!("No virtual modifier left for key code {}", key),
                bit => mask |= bit,
            }
        }

        let key = KeyDefinition::new(grab.key_code, mask);
        match device.add_key_grab(&key) {
            Ok(()) => {
                let id = registry.insert(key);
                info!("Grab {}: key code {} mask 0x{:x}", id, key.key_code, mask);
            }
            Err(e) => warn!("Failed to grab key code {}: {}", grab.key_code, e),
        }
    }
    registry
}

fn release_grabs(device: &mut dyn Device, registry: &KeyGrabs, grabs: &[GrabConfig]) {
    for grab in registry.iter() {
        if let Err(e) = device.remove_key_grab(grab.grab_id, registry) {
            debug!("Failed to release grab {}: {}", grab.grab_id, e);
        }
    }
    for key in grabs.iter().flat_map(|g| g.modifier_keys.iter()) {
        device.unmap_modifier(*key);
    }
}

/// `--click BUS PATH [EVENT]`
fn click(config: &Config, args: &[String]) -> Result<()> {
    if !config.a11y.enabled {
        anyhow::bail!("Accessibility bus disabled in config ([a11y] enabled = false)");
    }
    let (bus_name, path) = match (args.first(), args.get(1)) {
        (Some(bus_name), Some(path)) => (bus_name, path),
        _ => anyhow::bail!("--click needs a bus name and an object path"),
    };
    let event_name = args.get(2).map(String::as_str).unwrap_or("b1c");

    let client = AtspiClient::connect()?;
    let target = AccessibleRef::new(bus_name.as_str(), path.as_str());
    bridge::generate_mouse_event(&client, &client, &target, 0, 0, event_name)
        .context("Failed to generate mouse event")?;
    Ok(())
}

fn main() -> Result<()> {
    // Check command line arguments
    let args: Vec<String> = std::env::args().collect();

    // --help
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    // --version
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("a11y-input-bridge {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Config file generation mode
    if args.iter().any(|a| a == "--init-config") {
        let force = args.iter().any(|a| a == "--force" || a == "-f");
        let path = Config::write_default_config(force)?;
        println!("Config file written: {}", path.display());
        return Ok(());
    }

    // Load before the logger so [log] level can set the default filter
    let loaded = Config::load();
    let level = match &loaded {
        Ok(config) => config.log.level.clone(),
        Err(_) => LogConfig::default().level,
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    info!("a11y-input-bridge starting...");
    let config = match loaded {
        Ok(config) => {
            match Config::config_path() {
                Some(path) => info!("Loaded config: {}", path.display()),
                None => info!("Using built-in default config"),
            }
            config
        }
        Err(e) => {
            warn!("{:#}; using built-in defaults, no grabs registered", e);
            Config::default()
        }
    };

    if let Some(pos) = args.iter().position(|a| a == "--click") {
        return click(&config, &args[pos + 1..]);
    }

    let mut device = config
        .bridge
        .backend
        .open(&config, Box::new(log_key))
        .context("Failed to open input backend")?;

    if !device.is_functional() {
        warn!("Compositor offers no AT-SPI capability; running inert");
    }

    let grabs = register_grabs(device.as_mut(), &config.grabs);

    let mut bridge_loop = BridgeLoop::new(device)?;
    bridge_loop.handle_signals()?;

    // Notify systemd that we're ready
    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]);

    let result = bridge_loop.run();
    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Stopping]);

    let device = bridge_loop.state_mut().device_mut();
    if let Some(err) = device.keymap_error() {
        debug!("Last keymap error: {}", err);
    }
    release_grabs(device, &grabs, &config.grabs);

    info!("a11y-input-bridge stopped");
    result
}

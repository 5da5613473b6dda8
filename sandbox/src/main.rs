// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Herald Sandbox
// Small demo wiring a few modules through one bus

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::Result;
use herald_core::{handlers, BusConfig, EventBus, EventQueue, HandlerResult, Subscriber};

const CONFIG_PATH: &str = "sandbox/herald.ron";

// --- Events ---

#[derive(Debug)]
struct DamageTaken {
    amount: i32,
}

#[derive(Debug)]
struct FrameBudget {
    millis: u32,
}

#[derive(Debug)]
struct PlayerName;

#[derive(Debug)]
enum Input {
    Key(char),
    Quit,
}

// --- Modules ---

#[derive(Subscriber)]
struct Health {
    value: AtomicI32,
}

#[handlers]
impl Health {
    #[subscribe(priority = 10)]
    fn on_damage(&self, damage: &DamageTaken) -> HandlerResult {
        let left = self.value.fetch_sub(damage.amount, Ordering::Relaxed) - damage.amount;
        log::info!("Health: took {} damage, {left} left.", damage.amount);
        if left < 0 {
            anyhow::bail!("health dropped below zero ({left})");
        }
        Ok(())
    }

    #[subscribe_ref]
    fn throttle(&self, budget: &mut FrameBudget) -> HandlerResult {
        budget.millis = budget.millis.min(8);
        Ok(())
    }
}

struct Hud {
    open: AtomicBool,
    lines: Mutex<Vec<String>>,
}

impl Subscriber for Hud {
    fn is_alive(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }
}

#[handlers]
impl Hud {
    #[subscribe]
    fn show_damage(&self, damage: &DamageTaken) -> HandlerResult {
        self.lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(format!("-{}", damage.amount));
        Ok(())
    }

    #[subscribe(once)]
    fn first_input(&self, input: &Input) -> HandlerResult {
        log::info!("HUD: first input received ({input:?}).");
        Ok(())
    }
}

#[derive(Default, Subscriber)]
struct Profile;

#[handlers]
impl Profile {
    #[respond]
    fn player_name(&self, _: &PlayerName) -> Result<String> {
        Ok("Ada".to_string())
    }
}

fn load_config() -> Result<BusConfig> {
    if Path::new(CONFIG_PATH).exists() {
        BusConfig::load(CONFIG_PATH)
    } else {
        log::info!("No `{CONFIG_PATH}` found, using the default bus configuration.");
        Ok(BusConfig::default())
    }
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info"))
        .filter_module("herald_core", log::LevelFilter::Debug)
        .init();

    let bus = Arc::new(EventBus::with_config(load_config()?));

    let health = Arc::new(Health {
        value: AtomicI32::new(10),
    });
    let hud = Arc::new(Hud {
        open: AtomicBool::new(true),
        lines: Mutex::new(Vec::new()),
    });
    let profile = Arc::new(Profile);

    bus.register(&health);
    bus.register(&hud);
    bus.register(&profile);
    log::info!("{} handler(s) registered.", bus.total_handlers());

    // Fire-and-forget, with failures reported but not fatal.
    bus.add_filter::<DamageTaken>(|damage, _| damage.amount > 0);
    for amount in [3, 0, 4, 5] {
        if let Err(e) = bus.publish(&DamageTaken { amount }) {
            log::warn!("{e}");
        }
    }

    // Mutable payload.
    let mut budget = FrameBudget { millis: 16 };
    bus.publish_ref(&mut budget)?;
    log::info!("Frame budget after modules: {}ms.", budget.millis);

    // Request/response.
    let name: String = bus.request(&PlayerName);
    log::info!("Player name: {name}.");

    // Inputs produced on another thread, delivered on this one.
    let inputs = EventQueue::<Input>::new();
    let sender = inputs.sender();
    let producer = thread::spawn(move || {
        for key in ['w', 'a', 's', 'd'] {
            if sender.send(Input::Key(key)).is_err() {
                break;
            }
        }
        let _ = sender.send(Input::Quit);
    });
    if producer.join().is_err() {
        anyhow::bail!("input producer panicked");
    }
    let flushed = inputs.flush(&bus)?;
    log::info!("Flushed {flushed} input event(s).");

    // A closed HUD reports itself dead; its handlers get purged.
    hud.open.store(false, Ordering::Relaxed);
    let _ = bus.publish(&DamageTaken { amount: 1 });
    log::info!(
        "HUD lines: {:?}; {} handler(s) left after the HUD closed.",
        hud.lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner),
        bus.total_handlers()
    );

    bus.unregister(health.as_ref());
    drop(profile);
    log::info!("{} handler(s) purged by sweep.", bus.sweep());
    log::info!("{} handler(s) left.", bus.total_handlers());
    Ok(())
}

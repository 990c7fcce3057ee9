//! # Combo replay
//!
//! Scripts one round of a fictional game through a [`Session`]: a RAM
//! image is rewritten every frame the way an emulator core would, and the
//! session turns it into frames, damage deltas and combo records.
//!
//! ```bash
//! RUST_LOG=fightlens_core=debug cargo run --example combo_replay
//! ```

use fightlens_core::{
    ComboEvent, InputCommand, MappingTable, RamImage, Session, TelemetryConfig, ValueKind,
};
use tracing_subscriber::EnvFilter;

// ── Memory layout ────────────────────────────────────────────────────────────

const MAPPING: &str = r#"
game = "demo"

[[field]]
name = "timer"
address = 0x00
type = "int8"
min = 0
max = 99

[[field]]
name = "p1_x"
address = 0x02
type = "int16"
min = 0
max = 384

[[field]]
name = "p2_x"
address = 0x04
type = "int16"
min = 0
max = 384

[[field]]
name = "p1_health"
address = 0x06
type = "int16"
min = 0
max = 144

[[field]]
name = "p2_health"
address = 0x08
type = "int16"
min = 0
max = 144

[[field]]
name = "p1_meter"
address = 0x0A
type = "int8"
min = 0
max = 96

[[field]]
name = "p1_attacking"
address = 0x0B
type = "int8"

[[field]]
name = "p2_blocking"
address = 0x0C
type = "int8"
"#;

const CONFIG: &str = r#"
[combo]
max_frames_between_hits = 12

[[patterns.demo]]
name = "Hadoken"
notation = "236A"
max_span_frames = 20

[[patterns.demo]]
name = "Shoryuken"
notation = "623C"
max_span_frames = 20
"#;

// ── Game script ──────────────────────────────────────────────────────────────

/// Mutable game state the script pokes at; written to RAM every frame.
struct Arena {
    timer: f64,
    p1_x: f64,
    p2_x: f64,
    p1_health: f64,
    p2_health: f64,
    p1_meter: f64,
    p1_attacking: bool,
    p2_blocking: bool,
}

impl Arena {
    fn new() -> Self {
        Self {
            timer: 99.0,
            p1_x: 120.0,
            p2_x: 260.0,
            p1_health: 144.0,
            p2_health: 144.0,
            p1_meter: 0.0,
            p1_attacking: false,
            p2_blocking: false,
        }
    }

    fn ram(&self) -> RamImage {
        let mut ram = RamImage::new(0, 16);
        let writes = [
            (0x00, ValueKind::Int8, self.timer),
            (0x02, ValueKind::Int16, self.p1_x),
            (0x04, ValueKind::Int16, self.p2_x),
            (0x06, ValueKind::Int16, self.p1_health),
            (0x08, ValueKind::Int16, self.p2_health),
            (0x0A, ValueKind::Int8, self.p1_meter),
            (0x0B, ValueKind::Int8, if self.p1_attacking { 1.0 } else { 0.0 }),
            (0x0C, ValueKind::Int8, if self.p2_blocking { 1.0 } else { 0.0 }),
        ];
        for (addr, kind, value) in writes {
            if let Err(e) = ram.write(addr, kind, value) {
                eprintln!("bad write: {e}");
            }
        }
        ram
    }
}

/// What happens on a scripted frame.
enum Beat {
    Input(&'static str),
    Strike { input: &'static str, damage: f64 },
    Block,
    Spend(f64),
}

fn round_one() -> Vec<(u64, Beat)> {
    use Beat::*;
    vec![
        (10, Input("2")),
        (11, Input("3")),
        (12, Strike { input: "6A", damage: 14.0 }),
        (18, Strike { input: "5B", damage: 10.0 }),
        (25, Strike { input: "2C", damage: 18.0 }),
        (90, Block),
        (140, Input("6")),
        (141, Input("2")),
        (142, Strike { input: "3C", damage: 30.0 }),
        (146, Spend(48.0)),
        (150, Strike { input: "5C", damage: 24.0 }),
        (157, Strike { input: "5C", damage: 24.0 }),
        (300, Strike { input: "5A", damage: 6.0 }),
    ]
}

// ── Driver ───────────────────────────────────────────────────────────────────

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("fightlens combo replay");
    println!("══════════════════════\n");

    let config = match TelemetryConfig::from_toml_str(CONFIG) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config: {e}");
            return;
        }
    };
    let table = match MappingTable::from_toml_str("demo", MAPPING) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("mapping: {e}");
            return;
        }
    };
    let mut session = Session::with_table(table, &config);
    session.tracker_mut().set_listener(|record| {
        println!(
            "  ► recorded {:<22} {} hits, {:>3} damage, complexity {:.1}{}",
            record.description,
            record.hit_count,
            record.total_damage,
            record.complexity,
            record.pattern.as_deref().map(|p| format!(" [{p}]")).unwrap_or_default(),
        );
    });

    let mut arena = Arena::new();
    arena.p1_meter = 96.0;
    let script = round_one();
    let mut updates = 0usize;

    for frame in 0..320u64 {
        arena.p1_attacking = false;
        arena.p2_blocking = false;
        if frame % 60 == 0 && arena.timer > 0.0 {
            arena.timer -= 1.0;
        }

        let mut input = None;
        for (_, beat) in script.iter().filter(|(f, _)| *f == frame) {
            match *beat {
                Beat::Input(token) => input = InputCommand::parse(token),
                Beat::Strike { input: token, damage } => {
                    input = InputCommand::parse(token);
                    arena.p1_attacking = true;
                    arena.p2_health = (arena.p2_health - damage).max(0.0);
                    arena.p2_x = (arena.p2_x + 2.0).min(384.0);
                }
                Beat::Block => arena.p2_blocking = true,
                Beat::Spend(amount) => arena.p1_meter = (arena.p1_meter - amount).max(0.0),
            }
        }

        let outcome = session.process_frame(frame, &arena.ram(), input);
        if outcome.update.is_some() {
            updates += 1;
        }
        for event in &outcome.events {
            match event {
                ComboEvent::Started { frame_number, damage } => {
                    println!("frame {frame_number:>4}: combo started ({damage} damage)")
                }
                ComboEvent::Extended { frame_number, hit_count, damage } => {
                    println!("frame {frame_number:>4}: hit {hit_count} (+{damage})")
                }
                ComboEvent::Dropped { start_frame, hit_count, .. } => {
                    println!("frame {frame:>4}: segment from {start_frame} dropped after {hit_count} hit")
                }
                ComboEvent::Finished(_) => {}
            }
        }
        if frame == 200 {
            println!(
                "\nframe 200 hash {} (x distance {:.3})\n",
                &outcome.frame.hash()[..16],
                outcome.frame.x_distance()
            );
        }
    }
    if let Some(ComboEvent::Dropped { start_frame, .. }) = session.end_round() {
        println!("round over: trailing segment from {start_frame} dropped");
    }

    let stats = session.history().stats();
    println!("\n── Summary ──────────────────────────────────────────");
    println!("  frames with changes : {updates}");
    println!("  combos              : {}", stats.combo_count);
    println!("  total damage        : {}", stats.total_damage);
    println!("  longest             : {} hits", stats.max_length);
    println!("  diversity           : {:.3}", stats.diversity);
    for r in session.recent_combos(10) {
        let tags: Vec<&str> = [
            (r.is_reversal, "reversal"),
            (r.is_counter, "counter"),
            (r.is_finisher, "finisher"),
            (r.is_efficient_use, "efficient"),
        ]
        .into_iter()
        .filter_map(|(on, tag)| on.then_some(tag))
        .collect();
        println!("  {:>4}..{:<4} {:<22} {:?}", r.start_frame, r.end_frame, r.description, tags);
    }
}

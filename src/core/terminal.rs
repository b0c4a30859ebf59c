use console::{Emoji, style};

use crate::core::progress::{RunEvent, SequencedEvent};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_step(step: &str) {
    println!("{} {}", SPARKLE, style(step).bold());
}

pub fn print_link(label: &str, url: &str) {
    println!(
        "  {} {}: {}",
        GLOBE,
        style(label).bold(),
        style(url).underlined().cyan()
    );
}

/// One line per progress event, as `appforge run` follows a run.
pub fn print_event(event: &SequencedEvent) {
    let seq = style(format!("#{:<3}", event.seq)).dim();
    match &event.event {
        RunEvent::Status { step, message } => {
            println!("{} {} {}", seq, style(step.as_str()).bold().cyan(), message);
        }
        RunEvent::State { step, .. } => {
            println!("{} {} {}", seq, style(step.as_str()).bold().cyan(), style("saved").dim());
        }
        RunEvent::Complete { message, .. } => {
            println!("{} {}{}", seq, SUCCESS_ICON, style(message).green().bold());
        }
        RunEvent::Error { step, error } => {
            println!(
                "{} {}{} {}",
                seq,
                ERROR_ICON,
                style(step.as_str()).bold().red(),
                style(error).red()
            );
        }
    }
}

pub fn print_banner() {
    let lines: &[&str] = &[
        "                     __                    ",
        "  __ _ _ __  _ __   / _| ___  _ __ __ _  ___ ",
        " / _` | '_ \\| '_ \\ | |_ / _ \\| '__/ _` |/ _ \\",
        "| (_| | |_) | |_) ||  _| (_) | | | (_| |  __/",
        " \\__,_| .__/| .__/ |_|  \\___/|_|  \\__, |\\___|",
        "      |_|   |_|                   |___/      ",
    ];

    // Gradient: #818cf8 → #a78bfa → #22d3ee (diagonal top-left → bottom-right)
    let stops: [(u8, u8, u8); 3] = [(129, 140, 248), (167, 139, 250), (34, 211, 238)];
    let max_w = 45u32;
    let max_d = max_w + 5 * 10;

    println!();
    for (y, line) in lines.iter().enumerate() {
        for (x, ch) in line.chars().enumerate() {
            if ch == ' ' {
                print!(" ");
                continue;
            }
            let d = ((x as u32 + y as u32 * 10) * 1000 / max_d).min(1000);
            let (r, g, b) = if d <= 500 {
                lerp_color(stops[0], stops[1], d * 2)
            } else {
                lerp_color(stops[1], stops[2], (d - 500) * 2)
            };
            print!("\x1b[38;2;{};{};{}m{}", r, g, b, ch);
        }
        println!();
    }
    print!("\x1b[0m");

    println!("\x1b[38;2;34;211;238mDescribe an app. Get a working one.\x1b[0m\n");
}

fn lerp_color(a: (u8, u8, u8), b: (u8, u8, u8), t: u32) -> (u8, u8, u8) {
    let r = (a.0 as u32 * (1000 - t) + b.0 as u32 * t) / 1000;
    let g = (a.1 as u32 * (1000 - t) + b.1 as u32 * t) / 1000;
    let b_val = (a.2 as u32 * (1000 - t) + b.2 as u32 * t) / 1000;
    (r as u8, g as u8, b_val as u8)
}

pub fn print_goodbye() {
    println!("\n{} {}", SPARKLE, style("Bye from appforge.").bold().cyan());
}

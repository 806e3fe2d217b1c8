use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// ── Terminal helpers ──────────────────────────────────────────────────────────

fn term_width() -> usize {
    Term::stdout().size().1.max(60) as usize
}

// ── Banner ────────────────────────────────────────────────────────────────────

pub fn print_banner() {
    let _ = Term::stdout().clear_screen();

    let logo = [
        r"   ███████╗███████╗███████╗    ██████╗  ██████╗  ██████╗ ████████╗",
        r"   ╚══███╔╝██╔════╝██╔════╝    ██╔══██╗██╔═══██╗██╔═══██╗╚══██╔══╝",
        r"     ███╔╝ █████╗  ███████╗    ██████╔╝██║   ██║██║   ██║   ██║   ",
        r"    ███╔╝  ██╔══╝  ╚════██║    ██╔══██╗██║   ██║██║   ██║   ██║   ",
        r"   ███████╗██║     ███████║    ██║  ██║╚██████╔╝╚██████╔╝   ██║   ",
        r"   ╚══════╝╚═╝     ╚══════╝    ╚═╝  ╚═╝ ╚═════╝  ╚═════╝    ╚═╝   ",
    ];

    println!();
    for line in &logo {
        println!("{}", style(line).cyan().bold());
    }
    println!();
    println!(
        "{}",
        style(format!(
            "   Debian on encrypted ZFS  ·  UEFI  ·  v{}",
            env!("CARGO_PKG_VERSION")
        ))
        .dim()
        .italic()
    );
    println!();
    println!("{}", style("─".repeat(term_width().min(52))).dim());
    println!();
}

// ── Step header ───────────────────────────────────────────────────────────────

/// Prints a visually distinct numbered step header.
pub fn print_step(step: usize, total: usize, title: &str) {
    println!();
    let tag = style(format!(" {}/{} ", step, total)).black().on_cyan().bold();
    let heading = style(format!("  {}", title)).white().bold();
    println!("{}{}", tag, heading);
    println!("{}", style("─".repeat(term_width().min(52))).dim());
}

// ── Feedback messages ─────────────────────────────────────────────────────────

/// Green ✓: operation completed successfully.
pub fn print_success(msg: &str) {
    println!("  {}  {}", style("✓").green().bold(), style(msg).green());
}

/// Blue →: neutral info / progress note.
pub fn print_info(msg: &str) {
    println!("  {}  {}", style("→").blue().bold(), msg);
}

/// Yellow ⚠: non-fatal notice.
pub fn print_warning(msg: &str) {
    println!("  {}  {}", style("⚠").yellow().bold(), style(msg).yellow());
}

/// Red ✗: error (written to stderr).
pub fn print_error(msg: &str) {
    eprintln!("  {}  {}", style("✗").red().bold(), style(msg).red());
}

// ── Info box ──────────────────────────────────────────────────────────────────

/// Renders a bordered key→value box, sized to its widest row.
///
/// ```text
/// ┌─ Installation Target ──────────┐
/// │  Disk          /dev/sda        │
/// │  EFI (FAT32)   /dev/sda1       │
/// │  bpool         /dev/sda2       │
/// └────────────────────────────────┘
/// ```
pub fn print_kv_box(title: &str, rows: &[(&str, &str)]) {
    let key_width = rows.iter().map(|(k, _)| k.chars().count()).max().unwrap_or(0) + 3;
    let inner = rows
        .iter()
        .map(|(_, v)| key_width + v.chars().count())
        .max()
        .unwrap_or(0)
        .max(title.chars().count() + 1)
        .max(28);

    let dashes = "─".repeat(inner + 1 - title.chars().count());
    println!(
        "  {} {} {}",
        style("┌─").dim(),
        style(title).white().bold(),
        style(format!("{}┐", dashes)).dim()
    );

    for (key, val) in rows {
        let pad = inner - key_width - val.chars().count();
        println!(
            "  {}  {}{}{}  {}",
            style("│").dim(),
            style(format!("{:<width$}", key, width = key_width)).dim(),
            style(*val).white().bold(),
            " ".repeat(pad),
            style("│").dim()
        );
    }

    println!("  {}", style(format!("└{}┘", "─".repeat(inner + 4))).dim());
}

// ── Spinner ───────────────────────────────────────────────────────────────────

/// Returns a running braille spinner.
/// Call `pb.finish_and_clear()` when done.
pub fn spinner(msg: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("  {spinner:.cyan.bold}  {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.into());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

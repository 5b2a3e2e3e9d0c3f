use anyhow::{Context as _, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use comfy_table::{Attribute, Cell, Color, Table};
use inquire::{Confirm, InquireError, Select, Text};
use tracing_subscriber::EnvFilter;

use ledger_calc::clock::SystemClock;
use ledger_calc::config::{self, AppSettings, DEFAULT_DATA_ROOT};
use ledger_calc::export::{self, ExportFormat};
use ledger_calc::kv::JsonFileStore;
use ledger_calc::model::{ErrorKey, LedgerForm, Multiplier};
use ledger_calc::rows::row_len;
use ledger_calc::stats;
use ledger_calc::voice::{self, DictationTarget, Transcriber, VoiceLanguage};
use ledger_calc::{
    Direction, Edit, LedgerError, RowField, RowKind, ScalarField, SiteColor, SitePatch, SiteStore,
};

// ==========================================
// Constants
// ==========================================
const LOG_ENV: &str = "LEDGER_LOG";
const RED: Color = Color::Rgb { r: 185, g: 28, b: 28 };
const GREEN: Color = Color::Rgb { r: 4, g: 120, b: 87 };

// ==========================================
// CLI definition
// ==========================================

#[derive(Parser)]
#[command(name = "ledger-calc", about = "Site ledger calculator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current form
    Show,
    /// Set fond, soldeALinstant, soldeDeDebut or multiplier
    Set { field: ScalarField, value: String },
    /// Add, remove or edit rows of the current form
    Row {
        #[command(subcommand)]
        action: RowAction,
    },
    /// Calculate the balance of the current form
    Calculate,
    /// Clear every input of the current form
    Reset,
    /// Manage sites
    Site {
        #[command(subcommand)]
        action: SiteAction,
    },
    /// Manage the forms of the current site
    Form {
        #[command(subcommand)]
        action: FormAction,
    },
    /// Browse and restore past calculations
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Export the current form (text, image, pdf)
    Export {
        #[arg(default_value = "text")]
        format: ExportFormat,
    },
    /// Show totals for every site
    Summary,
    /// Dictate a value: `fond` or `<kind>:<row>:<field>`, e.g. `credit:1:details`
    Dictate {
        target: String,
        /// en-US, fr-FR, es-ES or ar-SA (defaults to the configured language)
        #[arg(long)]
        lang: Option<VoiceLanguage>,
    },
    /// Configure data directory and preferences
    Config,
    /// Edit the current form interactively
    Edit,
}

#[derive(Subcommand)]
enum RowAction {
    Add { kind: RowKind },
    /// Remove row number `row` (the last row of a kind is kept)
    Remove { kind: RowKind, row: usize },
    Set {
        kind: RowKind,
        row: usize,
        field: RowField,
        value: String,
    },
}

#[derive(Subcommand)]
enum SiteAction {
    List,
    Add,
    /// Delete a site (defaults to the current one)
    Delete { number: Option<usize> },
    Rename {
        name: String,
        #[arg(long)]
        number: Option<usize>,
    },
    Color {
        color: SiteColor,
        #[arg(long)]
        number: Option<usize>,
    },
    Select { number: usize },
    Next,
    Prev,
}

#[derive(Subcommand)]
enum FormAction {
    Add,
    /// Delete a form of the current site (defaults to the current one)
    Delete { number: Option<usize> },
    Select { number: usize },
    Next,
    Prev,
}

#[derive(Subcommand)]
enum HistoryAction {
    List,
    Show { number: usize },
    Restore { number: usize },
}

// ==========================================
// Main Function
// ==========================================

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    if let Commands::Config = command {
        setup_config_wizard()?;
        return Ok(());
    }

    let settings = match config::load_settings()? {
        Some(settings) => settings,
        None => setup_config_wizard()?,
    };

    let data_dir = settings.data_dir();
    let kv = JsonFileStore::open(&data_dir)
        .with_context(|| format!("Failed to open data directory {}", data_dir.display()))?;
    let mut store = SiteStore::open(Box::new(kv), Box::new(SystemClock), settings.store_options())?;

    let outcome = run(&mut store, &settings, command);
    store.close().context("Failed to save ledger")?;
    outcome
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(store: &mut SiteStore, settings: &AppSettings, command: Commands) -> Result<()> {
    match command {
        Commands::Show => print_form(store),
        Commands::Set { field, value } => {
            report_edit(store.set_field(field, &value));
            print_form(store);
        }
        Commands::Row { action } => row_command(store, action)?,
        Commands::Calculate => calculate(store)?,
        Commands::Reset => {
            store.reset();
            println!("✅ Form cleared.");
        }
        Commands::Site { action } => site_command(store, action)?,
        Commands::Form { action } => form_command(store, action)?,
        Commands::History { action } => history_command(store, action)?,
        Commands::Export { format } => export_current(store, settings, format)?,
        Commands::Summary => show_summary(store),
        Commands::Dictate { target, lang } => {
            let target = parse_target(&target)?;
            let language = lang.unwrap_or(settings.voice_language);
            match voice::dictate(store, &mut TypedTranscript, language, target) {
                Ok(edit) => report_edit(edit),
                Err(e @ (LedgerError::Unsupported(_) | LedgerError::Cancelled)) => {
                    println!("⚠️  {e}")
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Edit => edit_wizard(store)?,
        Commands::Config => unreachable!("handled before the store is opened"),
    }
    Ok(())
}

/// Maps a user-facing row/site/form number (1-based) to an index.
fn slot(number: usize) -> usize {
    number.saturating_sub(1)
}

fn report_edit(edit: Edit) {
    if edit == Edit::Rejected {
        println!("⚠️  Value rejected, form unchanged.");
    }
}

/// Prints capacity notices instead of failing the command.
fn notice<T>(outcome: ledger_calc::Result<T>) -> Result<Option<T>> {
    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_capacity() || matches!(e, LedgerError::LastSite) => {
            println!("⚠️  {e}");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

// ==========================================
// 1. Form display
// ==========================================

fn color_of(color: SiteColor) -> Option<Color> {
    match color {
        SiteColor::None => None,
        SiteColor::Blue => Some(Color::Rgb { r: 37, g: 99, b: 235 }),
        SiteColor::Green => Some(GREEN),
        SiteColor::Yellow => Some(Color::Rgb { r: 202, g: 138, b: 4 }),
        SiteColor::Red => Some(RED),
        SiteColor::Purple => Some(Color::Rgb { r: 126, g: 34, b: 206 }),
    }
}

fn site_cell(name: &str, color: SiteColor) -> Cell {
    let cell = Cell::new(name);
    match color_of(color) {
        Some(fg) => cell.fg(fg),
        None => cell,
    }
}

fn row_table(form: &LedgerForm, kind: RowKind) -> Table {
    let mut table = Table::new();
    let rows: Vec<[&str; 3]> = match kind {
        RowKind::Retrait => {
            table.set_header(vec!["#", "Retrait", "Payée", "Client"]);
            form.retrait_rows
                .iter()
                .map(|r| [r.retrait.as_str(), r.retrait_payee.as_str(), r.client.as_str()])
                .collect()
        }
        _ => {
            table.set_header(vec!["#", "Details", "Total", "Client"]);
            match kind {
                RowKind::Credit => form
                    .credit_rows
                    .iter()
                    .map(|r| [r.details.as_str(), r.total_client.as_str(), r.client.as_str()])
                    .collect(),
                RowKind::CreditPayee => form
                    .credit_payee_rows
                    .iter()
                    .map(|r| [r.details.as_str(), r.total_payee.as_str(), r.client.as_str()])
                    .collect(),
                _ => form
                    .depense_rows
                    .iter()
                    .map(|r| [r.details.as_str(), r.total_depense.as_str(), r.client.as_str()])
                    .collect(),
            }
        }
    };
    for (i, [a, b, c]) in rows.into_iter().enumerate() {
        table.add_row(vec![(i + 1).to_string(), a.to_string(), b.to_string(), c.to_string()]);
    }
    table
}

fn print_form(store: &SiteStore) {
    let site = store.current_site();
    let form = store.draft();
    println!(
        "\n📍 {} ({}) · form {}/{}",
        site.name,
        site.color,
        store.form_index() + 1,
        site.forms.len()
    );

    let mut table = Table::new();
    table.set_header(vec![Cell::new("Field"), Cell::new("Value"), Cell::new("")]);
    let scalars = [
        ("Fond", ScalarField::Fond, Some(ErrorKey::Fond)),
        ("Solde à l'instant", ScalarField::SoldeALinstant, Some(ErrorKey::SoldeALinstant)),
        ("Solde de début", ScalarField::SoldeDeDebut, Some(ErrorKey::SoldeDeDebut)),
        ("Multiplier", ScalarField::Multiplier, None),
    ];
    for (label, field, key) in scalars {
        let error = key.and_then(|k| store.errors().get(k)).unwrap_or_default();
        table.add_row(vec![
            Cell::new(label),
            Cell::new(form.scalar(field)),
            Cell::new(error).fg(RED),
        ]);
    }
    println!("{table}");

    for kind in RowKind::ALL {
        println!("\n--- {} ---", kind.label());
        println!("{}", row_table(form, kind));
    }

    if !form.result.is_empty() {
        println!("\n💰 {}", form.result);
    }
}

fn calculate(store: &mut SiteStore) -> Result<()> {
    match store.calculate() {
        Ok(balance) => {
            println!("✅ {}", balance.result);
            Ok(())
        }
        Err(LedgerError::Validation { key, message }) => {
            println!("❌ {key}: {message}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

// ==========================================
// 2. Rows
// ==========================================

fn row_command(store: &mut SiteStore, action: RowAction) -> Result<()> {
    match action {
        RowAction::Add { kind } => {
            store.add_row(kind);
            println!("✅ {} row {} added.", kind.label(), row_len(store.draft(), kind));
        }
        RowAction::Remove { kind, row } => {
            if store.remove_row(kind, slot(row))? == Edit::Rejected {
                println!("⚠️  The last {} row cannot be removed.", kind.label());
            }
        }
        RowAction::Set {
            kind,
            row,
            field,
            value,
        } => {
            report_edit(store.update_row(kind, slot(row), field, &value)?);
            println!("{}", row_table(store.draft(), kind));
        }
    }
    Ok(())
}

// ==========================================
// 3. Sites & forms
// ==========================================

fn site_command(store: &mut SiteStore, action: SiteAction) -> Result<()> {
    let current = store.site_index();
    let listing = matches!(action, SiteAction::List);
    match action {
        SiteAction::List => show_summary(store),
        SiteAction::Add => {
            if let Some(index) = notice(store.add_site())? {
                println!("✅ Created {}", store.sites()[index].name);
            }
        }
        SiteAction::Delete { number } => {
            let index = number.map(slot).unwrap_or(current);
            let Some(site) = store.sites().get(index) else {
                bail!("No site number {}", index + 1);
            };
            let prompt = format!("Delete {} and all of its forms?", site.name);
            if Confirm::new(&prompt).with_default(false).prompt()? {
                if notice(store.delete_site(index))?.is_some() {
                    println!("✅ Site deleted.");
                }
            }
        }
        SiteAction::Rename { name, number } => {
            let patch = SitePatch {
                name: Some(name),
                ..SitePatch::default()
            };
            store.update_site(number.map(slot).unwrap_or(current), patch)?;
        }
        SiteAction::Color { color, number } => {
            let patch = SitePatch {
                color: Some(color),
                ..SitePatch::default()
            };
            store.update_site(number.map(slot).unwrap_or(current), patch)?;
        }
        SiteAction::Select { number } => store.select_site(slot(number))?,
        SiteAction::Next => store.navigate_site(Direction::Next)?,
        SiteAction::Prev => store.navigate_site(Direction::Prev)?,
    }
    if !listing {
        println!("📍 {}", store.current_site().name);
    }
    Ok(())
}

fn confirm_last_form() -> bool {
    Confirm::new("This is the only form of the site. Clear it instead?")
        .with_default(false)
        .prompt()
        .unwrap_or(false)
}

fn form_command(store: &mut SiteStore, action: FormAction) -> Result<()> {
    let site = store.site_index();
    match action {
        FormAction::Add => {
            if let Some(index) = notice(store.add_form(site))? {
                println!(
                    "✅ Form {} added (solde de début: {})",
                    index + 1,
                    store.draft().solde_de_debut
                );
            }
        }
        FormAction::Delete { number } => {
            let index = number.map(slot).unwrap_or(store.form_index());
            match store.delete_form(site, index, confirm_last_form)? {
                Edit::Applied => println!("✅ Form deleted."),
                Edit::Rejected => println!("Cancelled"),
            }
        }
        FormAction::Select { number } => store.select_form(slot(number))?,
        FormAction::Next => store.navigate_form(Direction::Next),
        FormAction::Prev => store.navigate_form(Direction::Prev),
    }
    println!(
        "📄 Form {}/{}",
        store.form_index() + 1,
        store.current_site().forms.len()
    );
    Ok(())
}

// ==========================================
// 4. History
// ==========================================

fn history_command(store: &mut SiteStore, action: HistoryAction) -> Result<()> {
    match action {
        HistoryAction::List => {
            let entries = store.history();
            if entries.is_empty() {
                println!("(No calculations yet)");
                return Ok(());
            }
            let mut table = Table::new();
            table.set_header(vec!["#", "Date", "Result", "Solde de début", "Multiplier"]);
            for (i, entry) in entries.iter().enumerate() {
                table.add_row(vec![
                    (i + 1).to_string(),
                    entry.timestamp.clone(),
                    entry.result.clone(),
                    entry.solde_de_debut.clone(),
                    entry.multiplier.to_string(),
                ]);
            }
            println!("{table}");
        }
        HistoryAction::Show { number } => {
            let entry = store
                .history()
                .get(slot(number))
                .map(|entry| (*entry).clone())
                .with_context(|| format!("No history entry {number}"))?;
            println!("{}", export::render_text(&entry)?);
        }
        HistoryAction::Restore { number } => {
            let entry = store
                .history()
                .get(slot(number))
                .map(|entry| (*entry).clone())
                .with_context(|| format!("No history entry {number}"))?;
            store.restore(&entry);
            println!("✅ Restored {} from {}", entry.result, entry.timestamp);
        }
    }
    Ok(())
}

// ==========================================
// 5. Export & summary
// ==========================================

fn export_current(store: &SiteStore, settings: &AppSettings, format: ExportFormat) -> Result<()> {
    if format == ExportFormat::Text {
        println!("{}\n", export::render_text(store.draft())?);
    }
    println!("🔨 Exporting {format}...");
    match export::export_snapshot(store.draft(), format, &settings.export_dir()) {
        Ok(path) => println!("✅ Saved: {}", path.display()),
        Err(e @ LedgerError::Unsupported(_)) => println!("❌ {e}"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn show_summary(store: &SiteStore) {
    let mut table = Table::new();
    table.set_header(vec![
        Cell::new("#"),
        Cell::new("Site"),
        Cell::new("Forms"),
        Cell::new("Rows"),
        Cell::new("Total"),
        Cell::new("Last updated"),
    ]);

    for (i, site) in store.sites().iter().enumerate() {
        let site_stats = stats::form_stats(&site.forms);
        let total = stats::site_total(site);
        let marker = if i == store.site_index() { "▶" } else { "" };
        let total_cell = Cell::new(format!("{total:.1}"));
        let total_cell = if total < 0.0 { total_cell.fg(RED) } else { total_cell };
        table.add_row(vec![
            Cell::new(format!("{marker}{}", i + 1)),
            site_cell(&site.name, site.color),
            Cell::new(site_stats.forms),
            Cell::new(site_stats.rows),
            total_cell,
            Cell::new(&site.statistics.last_updated),
        ]);
    }

    let all = stats::form_stats(store.sites().iter().flat_map(|s| s.forms.iter()));
    let grand_total = stats::collection_total(store.sites());
    table.add_row(vec![
        Cell::new(""),
        Cell::new("Total").add_attribute(Attribute::Bold),
        Cell::new(all.forms).add_attribute(Attribute::Bold),
        Cell::new(all.rows).add_attribute(Attribute::Bold),
        Cell::new(format!("{grand_total:.1}")).add_attribute(Attribute::Bold),
        Cell::new(""),
    ]);

    println!("\n--- Site Summary ---");
    println!("{table}");
    println!(
        "Average per form: {:.1} rows, {:.1}",
        all.average_rows, all.average_amount
    );
}

// ==========================================
// 6. Voice input
// ==========================================

/// Terminal stand-in for a speech recognizer: the transcript is typed.
struct TypedTranscript;

impl Transcriber for TypedTranscript {
    fn listen(&mut self, language: VoiceLanguage) -> ledger_calc::Result<String> {
        Text::new(&format!("🎤 Transcript ({language}):"))
            .prompt()
            .map_err(|_| LedgerError::Cancelled)
    }
}

fn parse_target(raw: &str) -> Result<DictationTarget> {
    let parts: Vec<&str> = raw.split(':').collect();
    match parts.as_slice() {
        [field] => Ok(DictationTarget::Scalar(
            field.parse().map_err(anyhow::Error::msg)?,
        )),
        [kind, row, field] => Ok(DictationTarget::Row {
            kind: kind.parse()?,
            index: slot(row.parse::<usize>().with_context(|| format!("Invalid row number '{row}'"))?),
            field: field.parse()?,
        }),
        _ => bail!("Expected `<field>` or `<kind>:<row>:<field>`, got '{raw}'"),
    }
}

// ==========================================
// 7. Interactive editor
// ==========================================

const EDIT_FIELD: &str = "✏️  Set a field";
const EDIT_ROW: &str = "🧾 Edit a row";
const ADD_ROW: &str = "➕ Add a row";
const REMOVE_ROW: &str = "➖ Remove a row";
const CALCULATE: &str = "🧮 Calculate";
const BROWSE_HISTORY: &str = "🕘 Browse history";
const RESET: &str = "🧹 Reset form";
const DONE: &str = "✅ Done";

fn is_cancel(e: &InquireError) -> bool {
    matches!(
        e,
        InquireError::OperationCanceled | InquireError::OperationInterrupted
    )
}

fn select_kind() -> Result<RowKind, InquireError> {
    let labels: Vec<&str> = RowKind::ALL.iter().map(|k| k.label()).collect();
    let choice = Select::new("Row type:", labels).prompt()?;
    Ok(RowKind::ALL
        .into_iter()
        .find(|k| k.label() == choice)
        .unwrap_or(RowKind::Credit))
}

fn select_row(store: &SiteStore, kind: RowKind) -> Result<usize, InquireError> {
    let count = row_len(store.draft(), kind);
    let options: Vec<usize> = (1..=count).collect();
    Ok(slot(Select::new("Row:", options).prompt()?))
}

fn edit_step(store: &mut SiteStore, action: &str) -> Result<bool> {
    match action {
        EDIT_FIELD => {
            let field = Select::new(
                "Field:",
                vec!["fond", "soldeALinstant", "soldeDeDebut", "multiplier"],
            )
            .prompt()?;
            let field: ScalarField = field.parse().map_err(anyhow::Error::msg)?;
            let value = if field == ScalarField::Multiplier {
                let options: Vec<&str> = Multiplier::ALL.iter().map(|m| m.as_str()).collect();
                Select::new("Multiplier:", options).prompt()?.to_string()
            } else {
                Text::new("Value:")
                    .with_initial_value(&store.draft().scalar(field))
                    .prompt()?
            };
            report_edit(store.set_field(field, &value));
        }
        EDIT_ROW => {
            let kind = select_kind()?;
            let index = select_row(store, kind)?;
            let fields = if kind == RowKind::Retrait {
                vec!["retrait", "retraitPayee", "client"]
            } else {
                vec!["details", "total", "client"]
            };
            let field: RowField = Select::new("Column:", fields).prompt()?.parse()?;
            let value = Text::new("Value:").prompt()?;
            report_edit(store.update_row(kind, index, field, &value)?);
        }
        ADD_ROW => store.add_row(select_kind()?),
        REMOVE_ROW => {
            let kind = select_kind()?;
            let index = select_row(store, kind)?;
            report_edit(store.remove_row(kind, index)?);
        }
        CALCULATE => calculate(store)?,
        BROWSE_HISTORY => browse_history(store)?,
        RESET => {
            if Confirm::new("Clear every input of this form?")
                .with_default(false)
                .prompt()?
            {
                store.reset();
            }
        }
        _ => return Ok(false),
    }
    Ok(true)
}

fn browse_history(store: &mut SiteStore) -> Result<()> {
    if store.history().is_empty() {
        println!("(No calculations yet)");
        return Ok(());
    }
    loop {
        let total = store.history().len();
        if let Some(entry) = store.history().get(store.preview_index()) {
            println!(
                "\n🕘 {}/{} · {} · {}",
                store.preview_index() + 1,
                total,
                entry.timestamp,
                entry.result
            );
        }
        let choice = Select::new("History:", vec!["◀ Previous", "Next ▶", "Restore", "Back"]).prompt()?;
        match choice {
            "◀ Previous" => {
                store.navigate_history(Direction::Prev);
            }
            "Next ▶" => {
                store.navigate_history(Direction::Next);
            }
            "Restore" => {
                store.restore_preview()?;
                println!("✅ Restored.");
                return Ok(());
            }
            _ => return Ok(()),
        }
    }
}

fn edit_wizard(store: &mut SiteStore) -> Result<()> {
    let actions = vec![
        EDIT_FIELD,
        EDIT_ROW,
        ADD_ROW,
        REMOVE_ROW,
        CALCULATE,
        BROWSE_HISTORY,
        RESET,
        DONE,
    ];
    loop {
        print_form(store);
        let action = match Select::new("What next?", actions.clone()).prompt() {
            Ok(action) => action,
            Err(e) if is_cancel(&e) => break,
            Err(e) => return Err(e.into()),
        };
        match edit_step(store, action) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => match e.downcast_ref::<InquireError>() {
                Some(inner) if is_cancel(inner) => println!("Cancelled"),
                _ => println!("❌ {e}"),
            },
        }
        store.tick();
    }
    Ok(())
}

// ==========================================
// 8. Config
// ==========================================

fn setup_config_wizard() -> Result<AppSettings> {
    println!("\n⚙️  --- Configuration Setup ---");
    let current = config::load_settings().ok().flatten().unwrap_or_default();
    let default_root = if current.data_root.is_empty() {
        DEFAULT_DATA_ROOT.to_string()
    } else {
        current.data_root.clone()
    };

    println!("📂 Opening folder picker...");
    let picked_path = rfd::FileDialog::new()
        .set_title("Select Ledger Data Directory")
        .pick_folder();

    let data_root = if let Some(path) = picked_path {
        path.to_string_lossy().to_string()
    } else {
        println!("❌ No folder selected. Falling back to manual input.");
        Text::new("Enter Ledger Data Directory:")
            .with_default(&default_root)
            .prompt()?
    };

    let history_limit = Text::new("History entries kept per form:")
        .with_default(&current.history_limit.to_string())
        .prompt()?
        .trim()
        .parse()
        .unwrap_or(current.history_limit);

    let languages = vec![
        VoiceLanguage::FrFr,
        VoiceLanguage::EnUs,
        VoiceLanguage::EsEs,
        VoiceLanguage::ArSa,
        VoiceLanguage::None,
    ];
    let start = languages
        .iter()
        .position(|l| *l == current.voice_language)
        .unwrap_or(0);
    let voice_language = Select::new("Voice input language:", languages)
        .with_starting_cursor(start)
        .prompt()?;

    let settings = AppSettings {
        data_root,
        history_limit,
        voice_language,
        ..current
    };
    let path = config::save_settings(&settings)?;
    println!("✅ Settings saved to {}", path.display());
    Ok(settings)
}

use chrono::{Local, NaiveDate, NaiveTime};
use clap::{Args, Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use titra_core::*;

#[derive(Parser)]
#[command(name = "titra")]
#[command(about = "Personal medication titration log", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Answer yes to every confirmation prompt
    #[arg(long, global = true)]
    yes: bool,
}

/// Non-timestamp entry fields shared by several subcommands
#[derive(Args)]
struct FieldArgs {
    /// Medication name
    #[arg(long)]
    medication: Option<String>,

    /// Dose in mg (0.5 steps)
    #[arg(long)]
    dose_mg: Option<f64>,

    /// Galenic form: unknown, IR or LP
    #[arg(long)]
    form: Option<String>,

    /// Benefit rating (0-10)
    #[arg(long)]
    benefit: Option<i32>,

    /// Crash rating (0-10)
    #[arg(long)]
    crash: Option<i32>,

    /// Comma-separated side-effect codes
    #[arg(long)]
    side_effects: Option<String>,

    /// Free-text notes
    #[arg(long)]
    notes: Option<String>,
}

impl FieldArgs {
    fn to_fields(&self) -> Result<EntryFields> {
        let form = match self.form.as_deref() {
            Some(s) => Some(DoseForm::parse(s).ok_or_else(|| {
                Error::Other(format!("unknown form '{s}' (expected unknown, IR or LP)"))
            })?),
            None => None,
        };
        Ok(EntryFields {
            medication: self.medication.clone(),
            dose_mg: self.dose_mg,
            form,
            benefit: self.benefit,
            crash: self.crash,
            side_effects: self.side_effects.as_ref().map(|s| {
                s.split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect()
            }),
            notes: self.notes.clone(),
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Record "dose taken now" in the draft
    Take {
        #[command(flatten)]
        fields: FieldArgs,
    },

    /// Record "effect ended now" in the draft
    End,

    /// Save field edits into the draft
    Set {
        #[command(flatten)]
        fields: FieldArgs,
    },

    /// Show the current draft
    Status,

    /// Finalize the draft into a history entry
    Finalize {
        #[command(flatten)]
        fields: FieldArgs,
    },

    /// Discard the current draft
    Discard,

    /// Record a retroactive entry with explicit date and times
    Add {
        /// Calendar date (YYYY-MM-DD)
        #[arg(long)]
        date: String,

        /// Wall-clock take time (HH:MM)
        #[arg(long)]
        take_time: String,

        /// Wall-clock end time (HH:MM); earlier than the take time means next day
        #[arg(long)]
        end_time: Option<String>,

        #[command(flatten)]
        fields: FieldArgs,
    },

    /// List the history, newest first
    List,

    /// Delete an entry by id
    Delete { id: String },

    /// Edit an entry by id
    Edit {
        id: String,

        /// Replace the take timestamp (ISO with offset; empty clears it)
        #[arg(long)]
        taken_at: Option<String>,

        /// Replace the end timestamp (ISO with offset; empty clears it)
        #[arg(long)]
        end_at: Option<String>,

        #[command(flatten)]
        fields: FieldArgs,
    },

    /// Export the history
    Export {
        /// Output format: json or csv
        #[arg(long, default_value = "json")]
        format: String,

        /// Output file (defaults to a dated name in the current directory)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Write the printable HTML report
    Report {
        /// Output file (defaults to a dated name in the current directory)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Import a JSON backup
    Import { file: PathBuf },
}

fn main() -> Result<()> {
    titra_core::logging::init();

    let cli = Cli::parse();

    let config = Config::load()?;
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    std::fs::create_dir_all(&data_dir)?;

    let store = EntryStore::new(data_dir.join("entries.json"));
    let manager = DraftManager::new(JsonDraftStore::new(data_dir.join("draft.json")));
    let mut confirm = confirm_prompt(cli.yes);

    match cli.command {
        Commands::Take { fields } => cmd_take(&manager, &fields, &mut confirm),
        Commands::End => cmd_end(&manager),
        Commands::Set { fields } => cmd_set(&manager, &fields),
        Commands::Status => cmd_status(&manager),
        Commands::Finalize { fields } => cmd_finalize(&manager, &store, &fields, &mut confirm),
        Commands::Discard => cmd_discard(&manager, &mut confirm),
        Commands::Add {
            date,
            take_time,
            end_time,
            fields,
        } => cmd_add(&store, &date, &take_time, end_time.as_deref(), &fields, &mut confirm),
        Commands::List => cmd_list(&store),
        Commands::Delete { id } => cmd_delete(&store, &id, &mut confirm),
        Commands::Edit {
            id,
            taken_at,
            end_at,
            fields,
        } => cmd_edit(&store, &id, taken_at, end_at, &fields, &mut confirm),
        Commands::Export { format, output } => cmd_export(&store, &format, output),
        Commands::Report { output } => cmd_report(&store, output),
        Commands::Import { file } => cmd_import(&store, &file),
    }
}

/// Confirmation port: stdin prompt, or auto-accept under --yes.
fn confirm_prompt(auto_yes: bool) -> impl FnMut(&str) -> bool {
    move |prompt: &str| {
        if auto_yes {
            return true;
        }
        print!("{prompt} [y/N] ");
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            return false;
        }
        matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

fn cmd_take(
    manager: &DraftManager<JsonDraftStore>,
    fields: &FieldArgs,
    confirm: &mut dyn FnMut(&str) -> bool,
) -> Result<()> {
    match manager.take(&fields.to_fields()?, confirm)? {
        Some(draft) => {
            println!(
                "✓ Take recorded: {}",
                draft.taken_at.as_deref().unwrap_or("—")
            );
            println!("  Waiting for effect end (titra end).");
        }
        None => println!("Cancelled."),
    }
    Ok(())
}

fn cmd_end(manager: &DraftManager<JsonDraftStore>) -> Result<()> {
    let draft = manager.end_now()?;
    println!(
        "✓ Effect end recorded: {}",
        draft.end_at.as_deref().unwrap_or("—")
    );
    if let Some(minutes) =
        titra_core::time::duration_minutes(draft.taken_at.as_deref(), draft.end_at.as_deref())
    {
        println!("  Computed duration: {}", hours_label(minutes));
    }
    println!("  Finalize to save (titra finalize).");
    Ok(())
}

fn cmd_set(manager: &DraftManager<JsonDraftStore>, fields: &FieldArgs) -> Result<()> {
    manager.save_field_edits(&fields.to_fields()?)?;
    println!("✓ Draft updated.");
    Ok(())
}

fn cmd_status(manager: &DraftManager<JsonDraftStore>) -> Result<()> {
    let draft = manager.current()?;
    match (&draft.taken_at, &draft.end_at) {
        (None, _) => {
            println!("No active draft.");
            return Ok(());
        }
        (Some(taken), None) => {
            println!("Take recorded: {taken}");
            println!("Waiting for effect end.");
        }
        (Some(taken), Some(end)) => {
            println!("Take: {taken}");
            println!("End:  {end}");
            if let Some(minutes) =
                titra_core::time::duration_minutes(Some(taken.as_str()), Some(end.as_str()))
            {
                println!("Computed duration: {}", hours_label(minutes));
            }
            println!("Ready to finalize.");
        }
    }
    if !draft.medication.is_empty() {
        println!(
            "Fields: {} · {} mg · benefit {}/10 · crash {}/10",
            draft.medication,
            draft
                .dose_mg
                .map(|d| d.to_string())
                .unwrap_or_else(|| "—".into()),
            draft.benefit,
            draft.crash
        );
    }
    Ok(())
}

fn cmd_finalize(
    manager: &DraftManager<JsonDraftStore>,
    store: &EntryStore,
    fields: &FieldArgs,
    confirm: &mut dyn FnMut(&str) -> bool,
) -> Result<()> {
    match manager.finalize(&fields.to_fields()?, confirm, store)? {
        Some(entry) => {
            println!("✓ Entry saved.");
            display_entry(&entry);
        }
        None => println!("Cancelled."),
    }
    Ok(())
}

fn cmd_discard(
    manager: &DraftManager<JsonDraftStore>,
    confirm: &mut dyn FnMut(&str) -> bool,
) -> Result<()> {
    if !confirm("Discard the unfinalized draft?") {
        println!("Cancelled.");
        return Ok(());
    }
    manager.discard()?;
    println!("✓ Draft discarded.");
    Ok(())
}

fn cmd_add(
    store: &EntryStore,
    date: &str,
    take_time: &str,
    end_time: Option<&str>,
    fields: &FieldArgs,
    confirm: &mut dyn FnMut(&str) -> bool,
) -> Result<()> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| Error::Time(format!("invalid date '{date}': {e}")))?;
    let take_time = parse_wall_clock(take_time)?;
    let end_time = end_time.map(parse_wall_clock).transpose()?;

    let raw = compose_manual_entry(date, take_time, end_time, &fields.to_fields()?)?;
    match prepare_for_commit(raw, confirm) {
        Some(entry) => {
            store.upsert(entry.clone())?;
            println!("✓ Entry (backfill) saved.");
            display_entry(&entry);
        }
        None => println!("Cancelled."),
    }
    Ok(())
}

fn parse_wall_clock(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|e| Error::Time(format!("invalid time '{s}': {e}")))
}

fn cmd_list(store: &EntryStore) -> Result<()> {
    let entries = store.list_all()?;
    if entries.is_empty() {
        println!("No entries yet.");
        return Ok(());
    }
    for entry in &entries {
        display_entry(entry);
    }
    println!("{} entries.", entries.len());
    Ok(())
}

fn cmd_delete(
    store: &EntryStore,
    id: &str,
    confirm: &mut dyn FnMut(&str) -> bool,
) -> Result<()> {
    if !confirm("Delete this entry?") {
        println!("Cancelled.");
        return Ok(());
    }
    store.remove(id)?;
    println!("✓ Entry deleted.");
    Ok(())
}

fn cmd_edit(
    store: &EntryStore,
    id: &str,
    taken_at: Option<String>,
    end_at: Option<String>,
    fields: &FieldArgs,
    confirm: &mut dyn FnMut(&str) -> bool,
) -> Result<()> {
    let mut entry = store
        .get(id)?
        .ok_or_else(|| Error::Store(format!("no entry with id {id}")))?;

    fields.to_fields()?.apply_to_entry(&mut entry);
    if let Some(ts) = taken_at {
        entry.taken_at = timestamp_arg(&ts)?;
    }
    if let Some(ts) = end_at {
        entry.end_at = timestamp_arg(&ts)?;
    }

    // Entry mode stays whatever it was at creation
    match prepare_for_commit(entry, confirm) {
        Some(entry) => {
            store.upsert(entry.clone())?;
            println!("✓ Entry updated.");
            display_entry(&entry);
        }
        None => println!("Cancelled."),
    }
    Ok(())
}

/// Validate an ISO timestamp argument; an empty value clears the field.
fn timestamp_arg(s: &str) -> Result<Option<String>> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    if titra_core::time::parse_timestamp(s).is_none() {
        return Err(Error::Time(format!(
            "'{s}' is not a valid ISO timestamp with offset"
        )));
    }
    Ok(Some(s.to_string()))
}

fn cmd_export(store: &EntryStore, format: &str, output: Option<PathBuf>) -> Result<()> {
    let entries = store.list_all()?;
    let count = entries.len();
    let today = Local::now().format("%Y-%m-%d");

    let (content, path) = match format {
        "json" => (
            export_json(entries)?,
            output.unwrap_or_else(|| PathBuf::from(format!("titra-backup-{today}.json"))),
        ),
        "csv" => (
            export_csv(&entries)?,
            output.unwrap_or_else(|| PathBuf::from(format!("titra-{today}.csv"))),
        ),
        other => {
            return Err(Error::Other(format!(
                "unknown export format '{other}' (expected json or csv)"
            )))
        }
    };

    std::fs::write(&path, content)?;
    println!("✓ Exported {} entries to {}", count, path.display());
    Ok(())
}

fn cmd_report(store: &EntryStore, output: Option<PathBuf>) -> Result<()> {
    let entries = store.list_all()?;
    let html = build_report(&entries);
    let path = output.unwrap_or_else(|| {
        PathBuf::from(format!("titra-report-{}.html", Local::now().format("%Y-%m-%d")))
    });
    std::fs::write(&path, html)?;
    println!("✓ Report written to {}", path.display());
    Ok(())
}

fn cmd_import(store: &EntryStore, file: &PathBuf) -> Result<()> {
    let payload = std::fs::read_to_string(file)?;
    let count = import_entries(&payload, store)?;
    println!("✓ Imported {count} entries.");
    Ok(())
}

fn hours_label(minutes: i64) -> String {
    format!("{} h", (minutes as f64 / 6.0).round() / 10.0)
}

fn display_entry(entry: &Entry) {
    let medication = if entry.medication.is_empty() {
        "—"
    } else {
        entry.medication.as_str()
    };
    let dose = match entry.dose_label().as_str() {
        "" => "— mg".to_string(),
        label => format!("{label} mg"),
    };
    let duration = entry
        .duration_min
        .map(hours_label)
        .unwrap_or_else(|| "—".into());

    println!(
        "  {}  {medication} · {dose} [{}]",
        entry.taken_at.as_deref().unwrap_or("—"),
        entry.form.as_str()
    );
    println!(
        "    duration {duration} · benefit {}/10 · crash {}/10 · {}",
        entry.benefit,
        entry.crash,
        entry.entry_mode.as_str()
    );
    if !entry.side_effects.is_empty() {
        println!("    effects: {}", entry.side_effects.join(", "));
    }
    if !entry.notes.is_empty() {
        println!("    notes: {}", entry.notes);
    }
    println!("    id: {}", entry.id);
}

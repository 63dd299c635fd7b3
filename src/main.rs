use anyhow::{Context, Result};
use clap::Parser;
use rusqlite::Connection;

use card_ledger::config::{Cli, Command, SeedArgs, StoreArgs};
use card_ledger::logging::init_logging;
use card_ledger::report::{render_audit_log, render_collectors, render_drifts};
use card_ledger::{list_audit_entries, list_collectors, verify_all, Receipt, Seeder};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;

    let command = match cli.command {
        Some(command) => command,
        None => Command::Seed(SeedArgs::from_env()?),
    };
    let mut conn = cli
        .store
        .database()
        .open_and_migrate()
        .context("Failed to prepare database")?;

    match command {
        Command::Seed(args) => run_seed(&cli.store, &mut conn, &args)?,
        Command::Report => print_report(&conn)?,
        Command::Verify => run_verify(&conn)?,
        Command::Record { handle, card, quantity, price } => {
            let receipt = cli
                .store
                .gateway()
                .record_holding(&mut conn, &handle, &card, quantity, price)?;
            print_receipt(&receipt);
        }
        Command::Update { holding_id, quantity, price } => {
            let receipt = cli
                .store
                .gateway()
                .update_holding(&mut conn, &holding_id, quantity, price)?;
            print_receipt(&receipt);
        }
        Command::Remove { holding_id } => {
            let receipt = cli.store.gateway().remove_holding(&mut conn, &holding_id)?;
            print_receipt(&receipt);
        }
        Command::Transfer { holding_id, handle } => {
            let receipt = cli
                .store
                .gateway()
                .transfer_holding(&mut conn, &holding_id, &handle)?;
            print_receipt(&receipt);
        }
        Command::RemoveCollector { handle } => {
            let removal = cli.store.gateway().remove_collector(&mut conn, &handle)?;
            println!(
                "✓ Removed @{} and {} holding(s)",
                removal.handle, removal.holdings_removed
            );
        }
    }

    Ok(())
}

fn run_seed(store: &StoreArgs, conn: &mut Connection, args: &SeedArgs) -> Result<()> {
    let plan = args.plan()?;
    let mut seeder = Seeder::new(store.gateway(), args.seed);

    let summary = seeder.run(conn, &plan).context("Seeding failed")?;
    println!(
        "✓ Seeded {} collector(s), {} card(s), {} holding(s)\n",
        summary.collectors_created, summary.cards_created, summary.holdings_recorded
    );

    print_report(conn)
}

fn print_report(conn: &Connection) -> Result<()> {
    let collectors = list_collectors(conn)?;
    let entries = list_audit_entries(conn)?;

    println!("{}", render_collectors(&collectors));
    print!("{}", render_audit_log(&entries));
    Ok(())
}

fn run_verify(conn: &Connection) -> Result<()> {
    let drifts = verify_all(conn)?;
    print!("{}", render_drifts(&drifts));

    if !drifts.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_receipt(receipt: &Receipt) {
    println!("✓ {}", receipt.audit_entry.message);
    println!("  holding: {}", receipt.holding_id);
    println!(
        "  @{}: {} cards | total value = {}",
        receipt.totals.handle,
        receipt.totals.totals.total_cards,
        card_ledger::aggregate::money(receipt.totals.totals.total_value)
    );
    if let Some(previous) = &receipt.previous_owner {
        println!(
            "  @{}: {} cards | total value = {}",
            previous.handle,
            previous.totals.total_cards,
            card_ledger::aggregate::money(previous.totals.total_value)
        );
    }
}

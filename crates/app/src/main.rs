use chrono::Utc;
use clap::Parser;
use pdf_prompt_app::{server, telemetry, Cli, Command, Services};
use pdf_prompt_core::validation::parse_document_id;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        local = cli.settings.local_mode,
        "pdf-prompt boot"
    );

    match cli.command {
        Command::Serve { ref bind, ref public_url } => {
            let services = if cli.settings.local_mode {
                let (services, bus) = Services::local(&cli.settings, public_url)?;
                tokio::spawn(bus.run());
                services
            } else {
                Services::aws(&cli.settings)?
            };
            server::serve(Arc::new(services), bind).await?;
        }
        Command::List => {
            let services = build(&cli)?;
            let listing = services.lister.list().await?;
            if listing.items.is_empty() {
                println!("no documents");
            }
            for item in listing.items {
                println!("{}\t{}\t{}", item.id, item.status, item.name);
            }
        }
        Command::Reprocess { ref id } => {
            let id = parse_document_id(id)?;
            let services = build(&cli)?;
            let summary = services.router.embedding_builder().reprocess(&id).await?;
            println!(
                "{} reprocessed: {} page(s), {} chunk(s), artifacts {}",
                summary.document_id,
                summary.pages,
                summary.chunks,
                summary.artifacts.join(", ")
            );
        }
    }

    Ok(())
}

/// One-shot commands have no event bus; local mode starts empty.
fn build(cli: &Cli) -> anyhow::Result<Services> {
    if cli.settings.local_mode {
        let (services, _bus) = Services::local(&cli.settings, "http://localhost:3000")?;
        Ok(services)
    } else {
        Services::aws(&cli.settings)
    }
}

use crate::infra::{local_marketplace, seed_jobs};
use clap::Args;
use craftlink::config::MarketplaceConfig;
use craftlink::error::AppError;
use craftlink::marketplace::applications::{ApplicantSnapshot, ApplicationProposal};
use craftlink::marketplace::identity::{Actor, Role};
use craftlink::marketplace::jobs::{JobDraft, JobSeedImporter};
use craftlink::marketplace::notifications::NotificationInbox;
use craftlink::marketplace::MarketplaceError;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Number of professionals competing for the demo job.
    #[arg(long, default_value_t = 3)]
    pub(crate) applicants: usize,
    /// Optional job seed CSV to load before the walkthrough.
    #[arg(long)]
    pub(crate) seed_csv: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct ImportArgs {
    /// CSV with Title, Description, Category, Location, Budget, Client ID, Client Name columns
    pub(crate) csv: PathBuf,
}

pub(crate) async fn run_import(args: ImportArgs) -> Result<(), AppError> {
    let seeds = JobSeedImporter::from_path(&args.csv)?;
    let runtime = local_marketplace(&MarketplaceConfig::default());
    let jobs = seed_jobs(&runtime.marketplace, seeds).await?;

    println!("Imported {} job(s) from {}", jobs.len(), args.csv.display());
    for job in &jobs {
        println!(
            "  - {:<32} {:<14} {:<20} {}",
            job.title,
            job.category,
            job.location,
            format_budget(job.budget)
        );
    }
    Ok(())
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        applicants,
        seed_csv,
    } = args;
    let applicants = applicants.max(1);

    let runtime = local_marketplace(&MarketplaceConfig::default());
    let marketplace = runtime.marketplace.clone();

    println!("CraftLink hiring walkthrough");
    if let Some(path) = seed_csv {
        let seeds = JobSeedImporter::from_path(&path)?;
        let seeded = seed_jobs(&marketplace, seeds).await?;
        println!("Seeded {} job(s) from {}", seeded.len(), path.display());
    }

    let client = Actor::new("client-demo", "Adaeze Nwosu", Role::Client);
    let job = marketplace
        .jobs
        .post_job(
            &client,
            JobDraft {
                title: "Kitchen rewiring".to_string(),
                description: "Replace old wiring and add four sockets".to_string(),
                category: "Electrical".to_string(),
                location: "Surulere, Lagos".to_string(),
                budget: Some(180_000.0),
            },
        )
        .await?;
    println!(
        "\n{} posted \"{}\" ({})",
        client.display_name,
        job.title,
        format_budget(job.budget)
    );

    let professionals: Vec<Actor> = (1..=applicants)
        .map(|n| {
            Actor::new(
                format!("pro-{n}"),
                format!("Electrician {n}"),
                Role::Professional,
            )
        })
        .collect();

    let mut submitted = Vec::with_capacity(applicants);
    for (index, professional) in professionals.iter().enumerate() {
        let price = 150_000.0 + (index as f64) * 12_500.0;
        let application = marketplace
            .applications
            .submit(professional, &job.id, demo_proposal(price, index))
            .await?;
        println!(
            "  {} applied at {}",
            professional.display_name,
            format_budget(application.proposed_price)
        );
        submitted.push(application);
    }

    match marketplace
        .applications
        .submit(&professionals[0], &job.id, demo_proposal(140_000.0, 0))
        .await
    {
        Ok(_) => println!("  unexpected: duplicate application accepted"),
        Err(err) => println!("  second application refused: {err}"),
    }

    let unviewed = marketplace
        .applications
        .unviewed_count(&client, &job.id)
        .await?;
    let marked = marketplace
        .applications
        .mark_all_viewed(&client, &job.id)
        .await?;
    println!("\n{unviewed} unviewed application(s); marked {marked} as viewed");

    let chosen = submitted
        .iter()
        .min_by(|a, b| {
            a.proposed_price
                .unwrap_or(f64::MAX)
                .total_cmp(&b.proposed_price.unwrap_or(f64::MAX))
        })
        .map(|application| application.id.clone())
        .ok_or_else(|| {
            MarketplaceError::Invalid("no applications were submitted".to_string())
        })?;
    let outcome = marketplace.applications.accept(&client, &chosen).await?;
    println!(
        "Accepted {}; {} competing application(s) closed; chat room {}",
        outcome.application.applicant_name,
        outcome.rejected.len(),
        outcome.chat_room_id
    );

    let hired = professionals
        .iter()
        .find(|professional| professional.is(&outcome.application.applicant_id))
        .cloned()
        .unwrap_or_else(|| professionals[0].clone());
    marketplace
        .chat
        .send_message(&hired, &outcome.chat_room_id, "Thanks! I can start on Monday.")
        .await?;
    let room = marketplace.chat.room(&client, &outcome.chat_room_id).await?;
    println!(
        "\n{} has {} unread message(s): \"{}\"",
        client.display_name,
        room.unread_for(&client.user_id),
        room.last_message.as_deref().unwrap_or_default()
    );
    marketplace
        .chat
        .mark_read(&client, &outcome.chat_room_id)
        .await?;

    if let Some(rejected) = outcome.rejected.first() {
        let owner = professionals
            .iter()
            .find(|professional| {
                submitted
                    .iter()
                    .any(|app| &app.id == rejected && professional.is(&app.applicant_id))
            })
            .cloned();
        if let Some(owner) = owner {
            if let Err(err) = marketplace.applications.withdraw(&owner, rejected).await {
                println!("{} cannot withdraw: {err}", owner.display_name);
            }
        }
    }

    // Dropping every dispatcher handle lets the worker drain and exit.
    drop(marketplace);
    drop(runtime.marketplace);
    let _ = runtime.notification_worker.await;

    let inbox = NotificationInbox::new(Arc::clone(&runtime.store), 20);
    println!("\nNotifications");
    for actor in std::iter::once(&client).chain(professionals.iter()) {
        let notifications = inbox.for_user(actor).await?;
        println!("  {:<16} {}", actor.display_name, notifications.len());
        for notification in notifications.iter().take(3) {
            println!("      [{:?}] {}", notification.priority, notification.body);
        }
    }

    Ok(())
}

fn demo_proposal(price: f64, index: usize) -> ApplicationProposal {
    ApplicationProposal {
        proposed_price: Some(price),
        estimated_duration: Some(format!("{} days", 2 + index)),
        cover_letter: Some("Certified electrician with references available.".to_string()),
        availability: Some("Next week".to_string()),
        profile: ApplicantSnapshot {
            rating: Some(4.2 + (index as f32) * 0.2),
            review_count: 10 + index as u32 * 7,
            experience_years: Some(3 + index as u32),
            craft: Some("Electrician".to_string()),
            profile_image_url: None,
        },
    }
}

fn format_budget(amount: Option<f64>) -> String {
    match amount {
        Some(value) => format!("NGN {:.0}", value),
        None => "budget open".to_string(),
    }
}

//! `custody-cli`: a small command-line client mirroring the donor shell,
//! operating directly on the same on-disk ledger/store/registry/keys files
//! `custodyd` uses (so a checkout can be exercised without running the
//! daemon), plus a `seed` developer routine.

use std::collections::BTreeMap;

use clap::{Parser, Subcommand};
use custody_ledger::Ledger;
use custody_registry::Registry;
use custody_resolver::{CustodyService, EnvelopeStore};
use custody_spec::primitives::sign;
use custody_spec::{Aad, ActorKeyStore};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// `custody-cli` command line.
#[derive(Parser, Debug)]
#[command(author, version, about = "Report custody layer client", long_about = None)]
struct Cli {
    /// Increase output verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Path to the append-only ledger file.
    #[arg(long, env = "CUSTODY_LEDGER_FILE", default_value = "custody-data/ledger.jsonl")]
    ledger_file: String,
    /// Path to the envelope/soft-revocation store file.
    #[arg(long, env = "CUSTODY_STORE_FILE", default_value = "custody-data/store.json")]
    store_file: String,
    /// Path to the CA/CRL registry file.
    #[arg(long, env = "CUSTODY_REGISTRY_FILE", default_value = "custody-data/registry.json")]
    registry_file: String,
    /// Directory of per-actor `{actorId}_priv.pem` / `{actorId}_pub.pem` files.
    #[arg(long, env = "CUSTODY_KEYS_DIR", default_value = "custody-data/keys")]
    keys_dir: String,
    /// Subcommand.
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate (if absent) and print an actor's public key, enrolling it with the CA.
    Enroll {
        /// Actor id, e.g. `LAB-1`.
        actor_id: String,
    },
    /// Emit a fresh report for a patient.
    Emit {
        /// Report id to publish under.
        report_id: String,
        /// Emitting lab's actor id.
        lab_id: String,
        /// Owning patient's actor id.
        patient_ref: String,
        /// Report plaintext (UTF-8 text).
        content: String,
        /// Optional free-text exam type, carried in the AAD.
        #[arg(long)]
        exam_type: Option<String>,
        /// Optional short result summary, carried in the AAD.
        #[arg(long)]
        result_short: Option<String>,
    },
    /// Delegate read access of a report to another actor.
    Share {
        /// Report id (any id in its update chain resolves to the current one).
        report_id: String,
        /// Granting patient's actor id.
        patient_id: String,
        /// Recipient actor id.
        target_id: String,
    },
    /// Withdraw a previously shared actor's access.
    Unshare {
        /// Report id.
        report_id: String,
        /// Owning patient's actor id.
        patient_id: String,
        /// Actor id to withdraw access from.
        target_id: String,
    },
    /// Terminally revoke a report.
    Revoke {
        /// Report id to revoke.
        report_id: String,
        /// Revoking lab's actor id.
        lab_id: String,
        /// Optional free-text reason.
        #[arg(long)]
        reason: Option<String>,
    },
    /// Supersede one report id with another, freshly encrypted, version.
    Update {
        /// The id being superseded.
        old_report_id: String,
        /// The new current id.
        new_report_id: String,
        /// Updating lab's actor id.
        lab_id: String,
        /// New plaintext (UTF-8 text).
        content: String,
    },
    /// Decrypt and print a report's plaintext as the given requester.
    Open {
        /// Report id (any id in its update chain resolves to the current one).
        report_id: String,
        /// Requesting actor id.
        requester_id: String,
    },
    /// Print a report's lifecycle state.
    State {
        /// Report id.
        report_id: String,
    },
    /// Developer seed routine: creates LAB/PAT/HOSP demo actors, enrolls
    /// them with the CA, and emits one sample report.
    Seed,
}

fn open_service(cli: &Cli) -> anyhow::Result<(CustodyService, ActorKeyStore)> {
    let ledger = Ledger::open(&cli.ledger_file)?;
    let store = EnvelopeStore::open(&cli.store_file)?;
    let registry = Registry::open(&cli.registry_file)?;
    let keys = ActorKeyStore::open(&cli.keys_dir)?;
    Ok((CustodyService::new(ledger, store, registry), keys))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let (service, keys) = open_service(&cli)?;

    match cli.command {
        Commands::Enroll { actor_id } => {
            let pub_pem = keys.ensure_public_pem(&actor_id)?;
            let cert = service.registry().enroll(&actor_id, &pub_pem)?;
            println!("{}", serde_json::to_string_pretty(&cert)?);
        }
        Commands::Emit {
            report_id,
            lab_id,
            patient_ref,
            content,
            exam_type,
            result_short,
        } => {
            let (lab_priv, _) = keys.ensure_keys(&lab_id)?;
            let (_, pat_pub) = keys.ensure_keys(&patient_ref)?;
            let mut extras = BTreeMap::new();
            if let Some(v) = exam_type {
                extras.insert("examType".to_string(), v);
            }
            if let Some(v) = result_short {
                extras.insert("resultShort".to_string(), v);
            }
            let env = service.emit(
                &report_id,
                &lab_id,
                &lab_priv,
                &patient_ref,
                &pat_pub,
                content.as_bytes(),
                extras,
            )?;
            println!("{}", serde_json::to_string_pretty(&env)?);
        }
        Commands::Share {
            report_id,
            patient_id,
            target_id,
        } => {
            let (patient_priv, _) = keys.ensure_keys(&patient_id)?;
            let (_, target_pub) = keys.ensure_keys(&target_id)?;
            service.share(&report_id, &patient_id, &patient_priv, &target_id, &target_pub)?;
            println!("shared {report_id} with {target_id}");
        }
        Commands::Unshare {
            report_id,
            patient_id,
            target_id,
        } => {
            service.unshare(&report_id, &patient_id, &target_id)?;
            println!("unshared {report_id} from {target_id}");
        }
        Commands::Revoke {
            report_id,
            lab_id,
            reason,
        } => {
            service.revoke(&report_id, &lab_id, reason)?;
            println!("revoked {report_id}");
        }
        Commands::Update {
            old_report_id,
            new_report_id,
            lab_id,
            content,
        } => {
            let old_env = service
                .store()
                .get_envelope(&old_report_id)
                .ok_or_else(|| anyhow::anyhow!("no envelope stored for {old_report_id}"))?;
            let patient_ref = old_env.aad.patient_ref.clone();
            let (lab_priv, _) = keys.ensure_keys(&lab_id)?;
            let (_, pat_pub) = keys.ensure_keys(&patient_ref)?;

            let issued_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
            let aad = Aad::with_extras(&new_report_id, &lab_id, &patient_ref, issued_at, BTreeMap::new());
            let mut recipients = BTreeMap::new();
            recipients.insert(patient_ref, pat_pub);
            let mut new_env =
                custody_envelope::encrypt_for_recipients(content.as_bytes(), aad, &recipients)?;
            let ct_bytes = new_env.ciphertext_bytes()?;
            let msg = custody_envelope::lab_binding_message(&ct_bytes, &new_env.aad)?;
            new_env.sig_lab = Some(sign(&lab_priv, &msg)?);

            service.update(&old_report_id, &new_report_id, &lab_id, new_env)?;
            println!("updated {old_report_id} -> {new_report_id}");
        }
        Commands::Open {
            report_id,
            requester_id,
        } => {
            let (priv_key, _) = keys.ensure_keys(&requester_id)?;
            let (plaintext, rid) = service.open(&requester_id, &report_id, &priv_key)?;
            println!("reportId={rid}");
            println!("{}", String::from_utf8_lossy(&plaintext));
        }
        Commands::State { report_id } => {
            let st = service.state_of(&report_id);
            println!("{}", serde_json::to_string_pretty(&st)?);
        }
        Commands::Seed => run_seed(&service, &keys)?,
    }

    Ok(())
}

fn run_seed(service: &CustodyService, keys: &ActorKeyStore) -> anyhow::Result<()> {
    let lab_id = "LAB-DEMO";
    let pat_id = "PAT-DEMO";
    let hosp_id = "HOSP-DEMO";

    for actor_id in [lab_id, pat_id, hosp_id] {
        let pub_pem = keys.ensure_public_pem(actor_id)?;
        service.registry().enroll(actor_id, &pub_pem)?;
    }

    let (lab_priv, _) = keys.ensure_keys(lab_id)?;
    let (_, pat_pub) = keys.ensure_keys(pat_id)?;
    let mut extras = BTreeMap::new();
    extras.insert("examType".to_string(), "blood panel".to_string());
    extras.insert("resultShort".to_string(), "within range".to_string());

    let report_id = "R-DEMO-1";
    service.emit(
        report_id,
        lab_id,
        &lab_priv,
        pat_id,
        &pat_pub,
        b"Full report: all markers within reference range.",
        extras,
    )?;

    println!("seeded actors {lab_id}, {pat_id}, {hosp_id}");
    println!("seeded report {report_id}, owned by {pat_id}");
    println!(
        "try: custody-cli open {report_id} {pat_id}"
    );
    Ok(())
}

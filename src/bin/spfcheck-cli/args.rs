use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use spfcheck_lib::{SpfOptions, StaticRecords};

#[derive(Parser)]
#[command(name = "spfcheck-cli", about = "Évalue la politique SPF d'un expéditeur")]
pub struct Cli {
    /// adresse IP du client SMTP
    #[arg(long)]
    pub ip: String,

    /// enveloppe MAIL FROM (vide = postmaster@<helo>)
    #[arg(long, default_value = "")]
    pub sender: String,

    /// nom annoncé en HELO/EHLO
    #[arg(long)]
    pub helo: String,

    /// applique "v=spf1 a/24 mx/24 ptr ~all" aux domaines sans politique
    #[arg(long)]
    pub best_guess: bool,

    /// accepte les relais listés par spf.trusted-forwarder.org
    #[arg(long)]
    pub trusted_forwarder: bool,

    /// exige que les enregistrements SPF et TXT soient identiques
    #[arg(long)]
    pub strict_txt: bool,

    /// timeout DNS (ms)
    #[arg(long = "timeout")]
    pub timeout_ms: Option<u64>,

    /// explication utilisée pour un `fail` sans exp=
    #[arg(long)]
    pub default_explanation: Option<String>,

    /// politique locale prioritaire, host=record (répétable, `*.domaine` accepté)
    #[arg(long = "override", value_name = "HOST=RECORD")]
    pub overrides: Vec<String>,

    /// politique locale si le domaine n'en publie pas, host=record (répétable)
    #[arg(long = "fallback", value_name = "HOST=RECORD")]
    pub fallbacks: Vec<String>,

    /// résolutions DNS en parallèle via l'exécuteur à étapes
    #[arg(long)]
    pub staged: bool,

    /// format: human|json
    #[arg(long, default_value = "human")]
    pub format: String,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn options(&self) -> Result<SpfOptions> {
        let mut options = SpfOptions::default()
            .with_best_guess(self.best_guess)
            .with_trusted_forwarder(self.trusted_forwarder)
            .with_strict_txt(self.strict_txt);
        if let Some(timeout_ms) = self.timeout_ms {
            options = options.with_timeout_ms(timeout_ms);
        }
        if let Some(text) = &self.default_explanation {
            options = options.with_default_explanation(text.clone());
        }
        if !self.overrides.is_empty() {
            let records = static_records(&self.overrides).context("--override")?;
            options = options.with_override_policy(Arc::new(records));
        }
        if !self.fallbacks.is_empty() {
            let records = static_records(&self.fallbacks).context("--fallback")?;
            options = options.with_fallback_policy(Arc::new(records));
        }
        Ok(options)
    }
}

fn static_records(entries: &[String]) -> Result<StaticRecords> {
    let mut records = StaticRecords::new();
    for entry in entries {
        let Some((host, record)) = entry.split_once('=') else {
            bail!("expected host=record, got '{entry}'");
        };
        records
            .add_entry(host, record)
            .with_context(|| format!("invalid record for {host}"))?;
    }
    Ok(records)
}

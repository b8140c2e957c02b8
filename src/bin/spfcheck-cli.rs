#[path = "spfcheck-cli/args.rs"]
mod args;
#[path = "spfcheck-cli/output.rs"]
mod output;

use std::sync::Arc;

use anyhow::{Context, Result};
use spfcheck_lib::{Spf, ThreadedDnsLookup, TrustDnsService};

use crate::args::Cli;
use crate::output::{OutputRow, exit_code};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let options = cli.options()?;
    let dns = Arc::new(TrustDnsService::from_system_conf().context("init DNS resolver")?);

    let spf = if cli.staged {
        let lookups = Arc::new(ThreadedDnsLookup::new(dns.clone()));
        Spf::staged(dns, lookups, options).context("start SPF executor")?
    } else {
        Spf::with_options(dns, options)
    };

    let result = spf.check_spf(&cli.ip, &cli.sender, &cli.helo);
    let row = OutputRow::new(&cli, &result);
    output::print(&row, &cli.format)?;

    // on libère l'exécuteur avant de quitter
    drop(spf);
    std::process::exit(exit_code(row.result));
}

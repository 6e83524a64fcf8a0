use std::io;
use std::io::IsTerminal;
use std::io::Write;

use anyhow::{Result, bail};

use lore_memory::{MemoryManager, MemoryType, PurgeScope, RetrievalParams};

pub(crate) fn run_memory_search(
    memory: &MemoryManager,
    query: &str,
    top_k: Option<usize>,
    block: bool,
) -> Result<()> {
    let mut params = RetrievalParams::from(memory.config());
    if let Some(top_k) = top_k {
        params = params.with_top_k(top_k);
    }
    let results = memory.search_with(query, &params)?;

    if block {
        match lore_memory::format_memory_block(&results) {
            Some(rendered) => println!("{rendered}"),
            None => println!("(no matching memories)"),
        }
        return Ok(());
    }

    if results.is_empty() {
        println!("no memories matched '{query}'");
        return Ok(());
    }
    for (rank, hit) in results.iter().enumerate() {
        println!(
            "{:>2}. [{}] {}  score={:.3}  updated={}",
            rank + 1,
            hit.entry.mem_type,
            hit.entry.key,
            hit.score,
            hit.entry.updated_at_label(),
        );
        println!("    {}", hit.snippet);
    }
    Ok(())
}

pub(crate) fn run_memory_add(
    memory: &MemoryManager,
    key: &str,
    mem_type: MemoryType,
    content: &str,
    tags: &[String],
) -> Result<()> {
    let entry = memory.add(key, mem_type, content, tags)?;
    println!(
        "stored {} [{}] tags={}",
        entry.key,
        entry.mem_type,
        entry.tags.join(",")
    );
    Ok(())
}

pub(crate) fn run_memory_extract(
    memory: &MemoryManager,
    text: &str,
    type_override: Option<MemoryType>,
) -> Result<()> {
    let summary = memory.maybe_auto_extract(text, &[], type_override)?;
    if !memory.config().enable_auto_extract {
        println!("auto-extract is disabled (memory.enable_auto_extract = false)");
        return Ok(());
    }

    println!(
        "proposed={} verified={} deterministic={} skipped={}",
        summary.proposed, summary.verified, summary.deterministic, summary.skipped_invalid
    );
    if let Some(forced) = summary.forced_type {
        println!("all entries stored as {forced}");
    }
    for entry in &summary.written {
        println!("- {} [{}]: {}", entry.key, entry.mem_type, entry.content);
    }
    for report in &summary.repaired {
        println!(
            "repaired {}: {} -> {} entries",
            report.mem_type, report.before, report.after
        );
    }
    Ok(())
}

pub(crate) fn run_memory_repair(memory: &MemoryManager, mem_type: MemoryType) -> Result<()> {
    let report = memory.repair(mem_type)?;
    println!(
        "repaired {}: {} -> {} entries ({} removed)",
        report.mem_type,
        report.before,
        report.after,
        report.removed()
    );
    Ok(())
}

pub(crate) fn run_memory_purge(memory: &MemoryManager, scope: PurgeScope, yes: bool) -> Result<()> {
    let stats = memory.stats()?;
    let target_count = match scope {
        PurgeScope::All => stats.total,
        PurgeScope::Profile => stats.profile,
        PurgeScope::Fact => stats.facts,
        PurgeScope::Episode => stats.episodes,
    };

    println!("destructive operation: memory purge");
    println!("- selected scope: {}", scope_label(scope));
    println!("- targeted entries: {target_count}");
    println!(
        "- by type: profile={} fact={} episode={}",
        stats.profile, stats.facts, stats.episodes
    );

    if target_count == 0 {
        println!("no matching memory entries to purge");
        return Ok(());
    }

    if !yes {
        if !io::stdin().is_terminal() {
            bail!("refusing destructive purge in non-interactive mode without --yes");
        }

        let expected = format!("PURGE {}", scope_label(scope).to_uppercase());
        print!(
            "This permanently deletes memory under {}. Type '{expected}' to continue: ",
            memory.root().display()
        );
        io::stdout().flush()?;

        let mut confirmation = String::new();
        io::stdin().read_line(&mut confirmation)?;
        if confirmation.trim() != expected {
            println!("memory purge cancelled");
            return Ok(());
        }
    }

    memory.purge(scope)?;
    println!("memory purge complete: removed {target_count} entries");
    println!("remaining entries: {}", memory.stats()?.total);
    Ok(())
}

pub(crate) fn run_memory_prune(memory: &MemoryManager) -> Result<()> {
    let removed = memory.prune_episodes()?;
    println!(
        "removed {removed} episode file(s) older than {} days",
        memory.config().episode_retention_days
    );
    Ok(())
}

pub(crate) fn run_memory_stats(memory: &MemoryManager) -> Result<()> {
    let stats = memory.stats()?;
    println!("── memory stats ─────────────────────────────────────");
    println!("  root:          {}", memory.root().display());
    println!("  total:         {}", stats.total);
    println!("  profile:       {}", stats.profile);
    println!("  facts:         {}", stats.facts);
    println!("  episodes:      {}", stats.episodes);
    println!("  episode files: {}", stats.episode_files);
    println!("  index rows:    {}", stats.index_size);
    Ok(())
}

pub(crate) fn run_memory_reindex(memory: &MemoryManager) -> Result<()> {
    let index = memory.store().rebuild_index()?;
    println!("index rebuilt: {} keys", index.len());
    Ok(())
}

fn scope_label(scope: PurgeScope) -> &'static str {
    match scope {
        PurgeScope::All => "all",
        PurgeScope::Profile => "profile",
        PurgeScope::Fact => "fact",
        PurgeScope::Episode => "episode",
    }
}

//! Index maintenance command

use anyhow::Result;

use crate::store::ArchiveStore;

pub fn run(store: &ArchiveStore, rebuild: bool) -> Result<()> {
    if rebuild {
        store.rebuild_index()?;
        println!("Search index rebuilt.");
    }

    match store.check_index() {
        Ok(()) => {
            println!("Search index is consistent with the message table.");
            Ok(())
        }
        Err(e) if !rebuild => {
            // Surface the mismatch; repairing is an explicit decision.
            eprintln!("{e}");
            eprintln!("Run 'parley index --rebuild' to rebuild the index.");
            Err(e)
        }
        Err(e) => Err(e),
    }
}

//! Realtime get and search.

use super::Engine;
use seqstore_core::{GetResult, Operation, Result};
use seqstore_storage::{Query, SearchHit};
use tracing::debug;

impl Engine {
    /// Latest version of a document, including unrefreshed writes.
    ///
    /// Unrefreshed writes are served from the translog through the version
    /// map. Writes that have no translog location (replayed from the local
    /// translog) force a refresh first.
    pub fn get(&self, id: &str) -> Result<Option<GetResult>> {
        self.lifecycle.ensure_open()?;
        let result = self.get_inner(id);
        self.check_fatal(result)
    }

    fn get_inner(&self, id: &str) -> Result<Option<GetResult>> {
        let needs_refresh = {
            let guard = self.version_map.acquire_lock(id);
            match self.version_map.get_under_lock(id, &guard) {
                None => false,
                Some(value) if value.deleted => return Ok(None),
                Some(value) => match value.location {
                    Some(location) => match self.translog.read_operation(&location)? {
                        Some(Operation::Index(op)) => {
                            return Ok(Some(GetResult {
                                id: id.to_string(),
                                version: value.version,
                                seq_no: value.seq_no,
                                primary_term: value.primary_term,
                                source: op.source,
                            }))
                        }
                        _ => true,
                    },
                    None => true,
                },
            }
        };
        if needs_refresh {
            debug!(target: "seqstore::engine", id, "Get needs refresh");
            self.refresh_internal()?;
        }

        Ok(self.index.searcher().get(id).map(|doc| GetResult {
            id: doc.id.clone(),
            version: doc.version,
            seq_no: doc.seq_no,
            primary_term: doc.primary_term,
            source: doc.source.clone(),
        }))
    }

    /// Run `query` against the last refresh.
    pub fn search(&self, query: &Query) -> Result<Vec<SearchHit>> {
        self.lifecycle.ensure_open()?;
        Ok(self.index.searcher().search(query))
    }
}

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Stage of the save pipeline that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStage {
    Reorder,
    Duplicate,
    Content,
    Write,
}

impl fmt::Display for SaveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SaveStage::Reorder => "reordering pages",
            SaveStage::Duplicate => "duplicating pages",
            SaveStage::Content => "applying edits",
            SaveStage::Write => "writing the output file",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("no document is loaded")]
    NoDocument,
    #[error("could not open {path:?}: {source:#}")]
    Load {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("save failed while {stage}: {source:#}")]
    Save {
        stage: SaveStage,
        #[source]
        source: anyhow::Error,
    },
}

impl EditorError {
    pub fn save(stage: SaveStage) -> impl FnOnce(anyhow::Error) -> EditorError {
        move |source| EditorError::Save { stage, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use anyhow::anyhow;

    #[test]
    fn save_error_names_the_stage() {
        let err = EditorError::save(SaveStage::Duplicate)(anyhow!("disk full"));
        assert_eq!(
            err.to_string(),
            "save failed while duplicating pages: disk full"
        );
    }

    #[test]
    fn load_error_mentions_path() {
        let err = EditorError::Load {
            path: PathBuf::from("/tmp/missing.pdf"),
            source: anyhow!("not found"),
        };
        assert!(err.to_string().contains("missing.pdf"));
    }
}

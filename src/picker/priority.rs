use crate::metainfo::File;

/// Download priority of a file, or of a piece derived from its files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    /// Never requested.
    DoNotDownload,
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
    Immediate,
}

impl Priority {
    pub fn is_wanted(self) -> bool {
        self != Priority::DoNotDownload
    }
}

/// Maps per-file priorities onto pieces.
///
/// A piece shared by several files takes the highest priority among them.
/// Padding files never raise a piece's priority. Files without an entry in
/// `file_priorities` count as [`Priority::Normal`].
pub fn piece_priorities(
    files: &[File],
    file_priorities: &[Priority],
    piece_length: u64,
    piece_count: u32,
) -> Vec<Priority> {
    let mut pieces = vec![Priority::DoNotDownload; piece_count as usize];

    for (i, file) in files.iter().enumerate() {
        if file.padding || file.length == 0 {
            continue;
        }
        let priority = file_priorities.get(i).copied().unwrap_or_default();
        let (first, last) = file.piece_range(piece_length);
        let last = last.min(piece_count.saturating_sub(1));
        for piece in first..=last {
            let slot = &mut pieces[piece as usize];
            *slot = (*slot).max(priority);
        }
    }

    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file(offset: u64, length: u64) -> File {
        File {
            path: PathBuf::from("f"),
            length,
            offset,
            pieces_root: None,
            padding: false,
        }
    }

    #[test]
    fn test_shared_piece_takes_highest() {
        // Pieces of 10 bytes: file a covers 0..15, file b 15..30.
        let files = vec![file(0, 15), file(15, 15)];
        let prios = piece_priorities(&files, &[Priority::Low, Priority::High], 10, 3);
        assert_eq!(prios, vec![Priority::Low, Priority::High, Priority::High]);
    }

    #[test]
    fn test_skipped_file_pieces() {
        let files = vec![file(0, 20), file(20, 10)];
        let prios = piece_priorities(&files, &[Priority::DoNotDownload], 10, 3);
        assert_eq!(
            prios,
            vec![Priority::DoNotDownload, Priority::DoNotDownload, Priority::Normal]
        );
    }
}

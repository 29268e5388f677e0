//! Match strategies for `/verify`.
//!
//! `scan` compares the query against each registered face in store order and
//! stops at the first verified one. `search` ranks every registered face by
//! distance and takes the closest.

use crate::engine::EngineError;
use rollcall_core::{AnalyzerError, Embedder, FaceAnalyzer, StoredFace, Verification};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    /// Pairwise scan, first verified candidate wins.
    #[default]
    Scan,
    /// Ranked search over the whole store, closest candidate wins.
    Search,
}

impl MatchStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStrategy::Scan => "scan",
            MatchStrategy::Search => "search",
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scan" => Ok(MatchStrategy::Scan),
            "search" => Ok(MatchStrategy::Search),
            other => Err(format!("unknown match strategy: {other}")),
        }
    }
}

/// What a scan does when one registered face cannot be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateFailure {
    /// Treat the candidate as a non-match and keep scanning.
    #[default]
    Skip,
    /// Fail the whole request.
    Abort,
}

impl FromStr for CandidateFailure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(CandidateFailure::Skip),
            "abort" => Ok(CandidateFailure::Abort),
            other => Err(format!("unknown candidate failure policy: {other}")),
        }
    }
}

/// Result of comparing the query against one registered face.
#[derive(Debug)]
pub enum CandidateOutcome {
    Match(Verification),
    NoMatch(Verification),
    Failed(AnalyzerError),
}

impl CandidateOutcome {
    fn of(result: Result<Verification, AnalyzerError>) -> Self {
        match result {
            Ok(v) if v.verified => CandidateOutcome::Match(v),
            Ok(v) => CandidateOutcome::NoMatch(v),
            Err(e) => CandidateOutcome::Failed(e),
        }
    }
}

/// A registered face the query matched.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub student_id: String,
    /// Raw distance under the configured metric. Lower is closer.
    pub distance: f32,
}

/// Outcome of one `/verify` run.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub strategy: MatchStrategy,
    pub matched: Option<FaceMatch>,
}

pub fn run<E: Embedder>(
    strategy: MatchStrategy,
    on_failure: CandidateFailure,
    analyzer: &mut FaceAnalyzer<E>,
    query: &Path,
    gallery: &[StoredFace],
) -> Result<MatchOutcome, EngineError> {
    let matched = match strategy {
        MatchStrategy::Scan => scan(analyzer, query, gallery, on_failure)?,
        MatchStrategy::Search => search(analyzer, query, gallery)?,
    };
    Ok(MatchOutcome { strategy, matched })
}

/// Linear scan in gallery order. The query is embedded once.
pub fn scan<E: Embedder>(
    analyzer: &mut FaceAnalyzer<E>,
    query: &Path,
    gallery: &[StoredFace],
    on_failure: CandidateFailure,
) -> Result<Option<FaceMatch>, EngineError> {
    let query = analyzer.represent(query)?;

    for face in gallery {
        match CandidateOutcome::of(analyzer.compare(&query, &face.path)) {
            CandidateOutcome::Match(v) => {
                tracing::info!(student_id = %face.id, distance = v.distance, "scan: match");
                return Ok(Some(FaceMatch {
                    student_id: face.id.to_string(),
                    distance: v.distance,
                }));
            }
            CandidateOutcome::NoMatch(v) => {
                tracing::debug!(student_id = %face.id, distance = v.distance, "scan: no match");
            }
            CandidateOutcome::Failed(e) => match on_failure {
                CandidateFailure::Skip => {
                    tracing::warn!(student_id = %face.id, error = %e, "scan: skipping candidate");
                }
                CandidateFailure::Abort => {
                    return Err(EngineError::CandidateFailed {
                        student_id: face.id.to_string(),
                        source: e,
                    });
                }
            },
        }
    }

    tracing::info!(candidates = gallery.len(), "scan: exhausted without a match");
    Ok(None)
}

/// Ranked search; the closest candidate within threshold wins.
pub fn search<E: Embedder>(
    analyzer: &mut FaceAnalyzer<E>,
    query: &Path,
    gallery: &[StoredFace],
) -> Result<Option<FaceMatch>, EngineError> {
    let Some(best) = analyzer.find(query, gallery)?.into_iter().next() else {
        tracing::info!(candidates = gallery.len(), "search: no candidate within threshold");
        return Ok(None);
    };
    tracing::info!(
        student_id = %best.identity,
        path = %best.path.display(),
        distance = best.distance,
        "search: match"
    );
    Ok(Some(FaceMatch {
        student_id: best.identity,
        distance: best.distance,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::testing::{solid_jpeg, GridEmbedder};
    use rollcall_core::{DirectoryStore, DistanceMetric, FaceModel, FaceStore, StudentId};

    fn analyzer() -> FaceAnalyzer<GridEmbedder> {
        FaceAnalyzer::new(GridEmbedder, FaceModel::Facenet, DistanceMetric::Cosine)
    }

    fn register(store: &DirectoryStore, id: &str, rgb: [u8; 3]) {
        let image = store.scratch(&solid_jpeg(rgb)).unwrap();
        store.persist(&StudentId::parse(id).unwrap(), image).unwrap();
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("scan".parse::<MatchStrategy>(), Ok(MatchStrategy::Scan));
        assert_eq!(" SEARCH ".parse::<MatchStrategy>(), Ok(MatchStrategy::Search));
        assert!("pairwise".parse::<MatchStrategy>().is_err());
        assert_eq!("abort".parse::<CandidateFailure>(), Ok(CandidateFailure::Abort));
        assert!("retry".parse::<CandidateFailure>().is_err());
    }

    #[test]
    fn test_scan_first_verified_wins_over_closest() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();
        register(&store, "a-near", [200, 40, 40]);
        register(&store, "b-exact", [220, 20, 20]);
        let query = store.scratch(&solid_jpeg([220, 20, 20])).unwrap();
        let gallery = store.faces().unwrap();

        let hit = scan(&mut analyzer(), query.path(), &gallery, CandidateFailure::Skip)
            .unwrap()
            .unwrap();
        assert_eq!(hit.student_id, "a-near");

        let best = search(&mut analyzer(), query.path(), &gallery).unwrap().unwrap();
        assert_eq!(best.student_id, "b-exact");
        assert!(best.distance <= hit.distance);
    }

    #[test]
    fn test_scan_failure_policy() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("a-broken.jpg"), b"not a jpeg").unwrap();
        register(&store, "b-red", [220, 20, 20]);
        let query = store.scratch(&solid_jpeg([220, 20, 20])).unwrap();
        let gallery = store.faces().unwrap();

        let hit = scan(&mut analyzer(), query.path(), &gallery, CandidateFailure::Skip).unwrap();
        assert_eq!(hit.map(|m| m.student_id).as_deref(), Some("b-red"));

        let err =
            scan(&mut analyzer(), query.path(), &gallery, CandidateFailure::Abort).unwrap_err();
        match err {
            EngineError::CandidateFailed { student_id, .. } => assert_eq!(student_id, "a-broken"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_no_match_for_unregistered_face() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();
        register(&store, "red", [220, 20, 20]);
        let query = store.scratch(&solid_jpeg([20, 20, 220])).unwrap();
        let gallery = store.faces().unwrap();

        for strategy in [MatchStrategy::Scan, MatchStrategy::Search] {
            let outcome = run(
                strategy,
                CandidateFailure::Skip,
                &mut analyzer(),
                query.path(),
                &gallery,
            )
            .unwrap();
            assert_eq!(outcome.strategy, strategy);
            assert!(outcome.matched.is_none(), "{strategy} matched {:?}", outcome.matched);
        }
    }

    #[test]
    fn test_unreadable_query_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();
        register(&store, "red", [220, 20, 20]);
        let query = store.scratch(b"garbage").unwrap();
        let gallery = store.faces().unwrap();

        let err =
            scan(&mut analyzer(), query.path(), &gallery, CandidateFailure::Skip).unwrap_err();
        assert!(matches!(err, EngineError::Analyzer(AnalyzerError::Decode { .. })), "got {err:?}");
    }
}

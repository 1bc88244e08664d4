//! Property-based tests for imagetool-core.
//!
//! These tests use proptest to verify invariants across many randomly generated inputs.

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use crate::record::{ImageStatus, RegistryImageRecord, Visibility};
use crate::rotation::{plan, RotationPolicy, RotationStep};
use crate::stream::{ChunkReader, FileSource, IterSource};
use crate::{parse_key_value, ChecksumAlgorithm};

/// Strategy for generating checksum algorithms.
fn algorithm_strategy() -> impl Strategy<Value = ChecksumAlgorithm> {
    prop::sample::select(ChecksumAlgorithm::ALL.to_vec())
}

/// Strategy for generating visibilities.
fn visibility_strategy() -> impl Strategy<Value = Visibility> {
    prop_oneof![
        Just(Visibility::Public),
        Just(Visibility::Private),
        Just(Visibility::Shared),
        Just(Visibility::Community),
    ]
}

/// Strategy for generating records of one group, some already rotated.
fn records_strategy() -> impl Strategy<Value = Vec<RegistryImageRecord>> {
    prop::collection::vec(
        (
            0i64..1_000,
            visibility_strategy(),
            any::<bool>(),
            prop::option::of(any::<bool>()),
            prop::option::of(Just("2017-01-01T00:00:00Z".to_string())),
        ),
        0..8,
    )
    .prop_map(|items| {
        items
            .into_iter()
            .enumerate()
            .map(|(i, (created, visibility, active, is_latest, rotated_at))| {
                let created_at = Utc.timestamp_opt(1_500_000_000 + created * 60, 0).unwrap();
                let mut record = RegistryImageRecord::new(format!("id-{i}"), "CentOS 7", created_at);
                record.original_name = Some("CentOS 7".to_string());
                record.visibility = visibility;
                record.is_latest = is_latest;
                record.rotated_at = rotated_at;
                if !active {
                    record.status = ImageStatus::Deactivated;
                }
                record
            })
            .collect()
    })
}

/// Strategy for generating rotation policies.
fn policy_strategy() -> impl Strategy<Value = RotationPolicy> {
    (
        0usize..5,
        prop::option::of(Just("(latest)".to_string())),
        prop::option::of(Just("(OLD)".to_string())),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        visibility_strategy(),
    )
        .prop_map(
            |(retain, latest_suffix, rotated_suffix, deactivate, delete, hide, visibility)| {
                RotationPolicy {
                    retain,
                    latest_suffix,
                    rotated_suffix,
                    deactivate,
                    delete,
                    hide,
                    visibility,
                }
            },
        )
}

/// Applies planned steps the way a registry would.
fn simulate(records: &mut Vec<RegistryImageRecord>, steps: &[RotationStep]) {
    for step in steps {
        if step.delete {
            records.retain(|r| r.id != step.id);
            continue;
        }
        let Some(record) = records.iter_mut().find(|r| r.id == step.id) else {
            continue;
        };
        if let Some(name) = &step.update.name {
            record.name.clone_from(name);
        }
        if let Some(visibility) = step.update.visibility {
            record.visibility = visibility;
        }
        if let Some(is_latest) = step.update.is_latest {
            record.is_latest = Some(is_latest);
        }
        if let Some(rotated_at) = &step.update.rotated_at {
            record.rotated_at = Some(rotated_at.clone());
        }
        if step.deactivate {
            record.status = ImageStatus::Deactivated;
        }
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    /// Concatenated chunks equal the source content, once and in order.
    #[test]
    fn iter_source_concatenation(
        data in prop::collection::vec(any::<u8>(), 0..4096),
        chunk_size in 1usize..512,
    ) {
        let chunks: Vec<Bytes> = data.chunks(chunk_size).map(Bytes::copy_from_slice).collect();
        let mut reader = ChunkReader::new(Box::new(IterSource::new(chunks.into_iter())));

        let collected = futures::executor::block_on(async {
            let mut out = Vec::new();
            while let Some(chunk) = reader.next_chunk().await.unwrap() {
                out.extend_from_slice(&chunk);
            }
            out
        });
        prop_assert_eq!(collected, data);
    }

    /// File blocks concatenate to the file content for any block size.
    #[test]
    fn file_source_concatenation(
        data in prop::collection::vec(any::<u8>(), 0..4096),
        chunk_size in 1usize..512,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.raw");
        std::fs::write(&path, &data).unwrap();

        let (collected, sizes) = runtime().block_on(async {
            let source = FileSource::open(&path).await.unwrap().with_chunk_size(chunk_size);
            let mut reader = ChunkReader::new(Box::new(source));
            let mut out = Vec::new();
            let mut sizes = Vec::new();
            while let Some(chunk) = reader.next_chunk().await.unwrap() {
                sizes.push(chunk.len());
                out.extend_from_slice(&chunk);
            }
            (out, sizes)
        });
        prop_assert_eq!(collected, data);
        prop_assert!(sizes.iter().all(|s| *s > 0 && *s <= chunk_size));
    }

    /// Hashing in arbitrary pieces equals hashing the whole.
    #[test]
    fn chunked_digest_matches_whole(
        data in prop::collection::vec(any::<u8>(), 0..4096),
        chunk_size in 1usize..512,
        algorithm in algorithm_strategy(),
    ) {
        let mut hasher = algorithm.hasher();
        for chunk in data.chunks(chunk_size) {
            hasher.update(chunk);
        }
        let chunked = hasher.finalize_hex();
        prop_assert_eq!(chunked.len(), algorithm.hex_len());
        prop_assert_eq!(chunked, algorithm.digest(&data));
    }

    /// Digest lengths map to exactly one algorithm; other lengths to none.
    #[test]
    fn algorithm_inference(len in 0usize..256) {
        let inferred = ChecksumAlgorithm::from_digest_len(len);
        match len {
            32 => prop_assert_eq!(inferred, Some(ChecksumAlgorithm::Md5)),
            40 => prop_assert_eq!(inferred, Some(ChecksumAlgorithm::Sha1)),
            56 => prop_assert_eq!(inferred, Some(ChecksumAlgorithm::Sha224)),
            64 => prop_assert_eq!(inferred, Some(ChecksumAlgorithm::Sha256)),
            96 => prop_assert_eq!(inferred, Some(ChecksumAlgorithm::Sha384)),
            128 => prop_assert_eq!(inferred, Some(ChecksumAlgorithm::Sha512)),
            _ => prop_assert_eq!(inferred, None),
        }
    }

    /// A second rotation over the converged group plans nothing.
    #[test]
    fn rotation_idempotent(
        records in records_strategy(),
        policy in policy_strategy(),
    ) {
        let mut records = records;
        let first = plan(records.clone(), &policy, now());
        prop_assert_eq!(first.len(), records.len());

        simulate(&mut records, &first);
        let second = plan(records, &policy, now());
        prop_assert!(second.iter().all(RotationStep::is_noop), "second run: {:?}", second);
    }

    /// Exactly one record of a non-empty group is planned as latest.
    #[test]
    fn rotation_single_latest(
        records in records_strategy(),
        policy in policy_strategy(),
    ) {
        let mut records = records;
        let steps = plan(records.clone(), &policy, now());
        simulate(&mut records, &steps);
        let latest = records.iter().filter(|r| r.is_latest == Some(true)).count();
        prop_assert_eq!(latest, usize::from(!steps.is_empty()));
    }

    /// Well-formed pairs parse back to their trimmed parts.
    #[test]
    fn key_value_parse(key in "[a-z_][a-z0-9_]{0,20}", value in "[a-zA-Z0-9 ._-]{0,20}") {
        let (k, v) = parse_key_value(&format!("{key}={value}")).unwrap();
        prop_assert_eq!(k, key);
        prop_assert_eq!(v, value.trim());
    }
}

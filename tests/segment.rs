// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use risinglight_proto::segment::{CompressionTypePb, EncodingTypePb};
use risinglight_segment::array::{Array, SchemaRef};
use risinglight_segment::catalog::{TabletColumn, TabletSchema};
use risinglight_segment::storage::*;
use risinglight_segment::testing::{ColumnWriteOptions, SegmentFileBuilder};
use risinglight_segment::types::{DataType, DataValue};
use test_case::test_case;
use tracing_subscriber::EnvFilter;

fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn ints(range: std::ops::Range<i32>) -> Vec<DataValue> {
    range.map(DataValue::Int32).collect()
}

fn pages_of(rows_per_page: usize) -> ColumnWriteOptions {
    ColumnWriteOptions {
        rows_per_page,
        ..Default::default()
    }
}

fn open(
    manager: &MemoryBlockManager,
    data: Vec<u8>,
    tablet: TabletSchema,
    options: &SegmentOptions,
) -> StorageResult<Arc<Segment>> {
    manager.put("seg.dat", data);
    Segment::open(manager, "seg.dat", 0, Arc::new(tablet), options, None, None)
}

/// A segment of one non-null `INT` column `k` holding `0..200`, 100 rows per page.
fn int_segment(manager: &MemoryBlockManager, opts: &ColumnWriteOptions) -> Arc<Segment> {
    let mut builder = SegmentFileBuilder::new();
    builder
        .add_column(0, &DataType::Int32, false, &ints(0..200), opts)
        .unwrap();
    let tablet = TabletSchema::new(vec![TabletColumn::new(0, "k", DataType::Int32, false)]);
    open(
        manager,
        builder.finish(),
        tablet,
        &SegmentOptions::default_for_test(),
    )
    .unwrap()
}

fn full_schema(segment: &Segment) -> SchemaRef {
    Arc::new(segment.tablet_schema().schema())
}

/// Every value of column `idx` the iterator produces.
fn collect(iter: &mut dyn ChunkIterator, idx: usize) -> Vec<DataValue> {
    let mut values = vec![];
    while let Some(chunk) = iter.next_batch().unwrap() {
        assert!(chunk.num_rows() > 0);
        values.extend(chunk.get_column_by_index(idx).values());
    }
    values
}

fn compare(cid: u32, op: CompareOp, value: DataValue) -> ColumnPredicateRef {
    Arc::new(ComparePredicate::new(cid, op, value))
}

#[test]
fn zone_maps_prune_pages() {
    init_logger();
    let manager = MemoryBlockManager::new();
    let segment = int_segment(&manager, &pages_of(100));
    let pred = compare(0, CompareOp::Gt, DataValue::Int32(150));

    let reader = segment.column(0).unwrap();
    let result = reader.zone_map_filter(&[pred.clone()], None).unwrap();
    assert_eq!(result.row_ranges, SparseRange::from_range(100, 200));

    let mut opts = SegmentReadOptions::default();
    opts.predicates.insert(0, vec![pred]);
    let stats = opts.stats.clone().unwrap();
    let mut iter = segment.new_iterator(&full_schema(&segment), &opts).unwrap();
    assert_eq!(collect(&mut *iter, 0), ints(151..200));
    assert_eq!(ReaderStatistics::get(&stats.rows_stats_filtered), 100);
    assert_eq!(ReaderStatistics::get(&stats.rows_vec_cond_filtered), 51);
    assert_eq!(ReaderStatistics::get(&stats.raw_rows_read), 100);
}

#[test]
fn segment_zone_map_returns_end_of_file() {
    let manager = MemoryBlockManager::new();
    let segment = int_segment(&manager, &pages_of(100));
    let mut opts = SegmentReadOptions::default();
    opts.predicates
        .insert(0, vec![compare(0, CompareOp::Ge, DataValue::Int32(200))]);
    let stats = opts.stats.clone().unwrap();
    let err = segment
        .new_iterator(&full_schema(&segment), &opts)
        .err()
        .unwrap();
    assert!(err.is_end_of_file());
    assert_eq!(ReaderStatistics::get(&stats.segment_stats_filtered), 200);

    opts.stats = None;
    let err = segment
        .new_iterator(&full_schema(&segment), &opts)
        .err()
        .unwrap();
    assert!(err.is_invalid_argument());
}

#[test]
fn predicate_of_wrong_type_is_rejected() {
    let manager = MemoryBlockManager::new();
    let segment = int_segment(&manager, &pages_of(100));
    let mut opts = SegmentReadOptions::default();
    opts.predicates
        .insert(0, vec![compare(0, CompareOp::Gt, DataValue::String("150".into()))]);
    let stats = opts.stats.clone().unwrap();
    let err = segment
        .new_iterator(&full_schema(&segment), &opts)
        .err()
        .unwrap();
    assert!(err.is_invalid_argument());
    assert_eq!(ReaderStatistics::get(&stats.segment_stats_filtered), 0);

    let mut opts = SegmentReadOptions::default();
    opts.delete_predicates
        .insert(0, compare(0, CompareOp::Eq, DataValue::Int64(1)));
    let err = segment
        .new_iterator(&full_schema(&segment), &opts)
        .err()
        .unwrap();
    assert!(err.is_invalid_argument());
}

#[test]
fn footer_hint_converges() {
    let mut builder = SegmentFileBuilder::new();
    for uid in 0..50 {
        builder
            .add_column(uid, &DataType::Int64, true, &vec![DataValue::Null; 10], &pages_of(4))
            .unwrap();
    }
    let data = builder.finish();
    let tablet = TabletSchema::new(
        (0..50)
            .map(|uid| TabletColumn::new(uid, format!("c{uid}"), DataType::Int64, true))
            .collect(),
    );
    let tablet = Arc::new(tablet);
    let manager = MemoryBlockManager::new();
    manager.put("seg.dat", data);
    let options = SegmentOptions::default_for_test();

    let mut hint = 16;
    let segment = Segment::open(&manager, "seg.dat", 1, tablet.clone(), &options, Some(&mut hint), None)
        .unwrap();
    assert_eq!(segment.num_rows(), 10);
    assert_eq!(segment.num_columns(), 50);
    assert_eq!(manager.read_count(), 2);
    assert!(hint > 16);

    manager.reset_read_count();
    let before = hint;
    Segment::open(&manager, "seg.dat", 1, tablet, &options, Some(&mut hint), None).unwrap();
    assert_eq!(manager.read_count(), 1);
    assert_eq!(hint, before);
}

#[test_case(1 ; "last byte of magic")]
#[test_case(5 ; "checksum")]
#[test_case(13 ; "footer body")]
fn corrupted_footer(pos_from_end: usize) {
    let mut builder = SegmentFileBuilder::new();
    builder
        .add_column(0, &DataType::Int32, false, &ints(0..10), &pages_of(100))
        .unwrap();
    let mut data = builder.finish();
    let len = data.len();
    data[len - pos_from_end] ^= 0x5a;
    let tablet = TabletSchema::new(vec![TabletColumn::new(0, "k", DataType::Int32, false)]);
    let err = open(
        &MemoryBlockManager::new(),
        data,
        tablet,
        &SegmentOptions::default_for_test(),
    )
    .err()
    .unwrap();
    assert!(err.is_corruption(), "{err}");
}

#[test]
fn corrupted_data_page_is_detected() {
    let mut builder = SegmentFileBuilder::new();
    builder
        .add_column(0, &DataType::Int32, false, &ints(0..10), &pages_of(100))
        .unwrap();
    let mut data = builder.finish();
    // the only data page starts the file
    data[0] ^= 0xff;
    let tablet = TabletSchema::new(vec![TabletColumn::new(0, "k", DataType::Int32, false)]);
    let manager = MemoryBlockManager::new();
    let segment = open(&manager, data, tablet, &SegmentOptions::default_for_test()).unwrap();
    let mut iter = segment
        .new_iterator(&full_schema(&segment), &SegmentReadOptions::default())
        .unwrap();
    assert!(iter.next_batch().unwrap_err().is_corruption());
}

#[test]
fn ordinal_seek() {
    let manager = MemoryBlockManager::new();
    let segment = int_segment(&manager, &pages_of(30));
    let reader = segment.column(0).unwrap();

    let page = reader.seek_at_or_before(95).unwrap();
    assert_eq!(page.page_index(), 3);
    assert_eq!(page.first_ordinal(), 90);
    assert_eq!(page.end_ordinal(), 120);
    let first = reader.seek_to_first().unwrap();
    assert_eq!(first.page_index(), 0);

    let mut iter = reader.new_iterator();
    iter.init(ColumnIteratorOptions::default()).unwrap();
    iter.seek_to_ordinal(85).unwrap();
    let mut dst = risinglight_segment::array::ArrayImpl::new_for(&DataType::Int32, 10);
    assert_eq!(iter.next_batch(10, &mut dst).unwrap(), 10);
    assert_eq!(dst.values().collect::<Vec<_>>(), ints(85..95));
    assert_eq!(iter.current_ordinal(), 95);

    iter.seek_to_ordinal(200).unwrap();
    assert_eq!(iter.next_batch(10, &mut dst).unwrap(), 0);
    assert!(iter.seek_to_ordinal(201).unwrap_err().is_not_found());

    let mut dst = risinglight_segment::array::ArrayImpl::new_for(&DataType::Int32, 3);
    iter.fetch_values_by_rowid(&[199, 3, 60], &mut dst).unwrap();
    assert_eq!(
        dst.values().collect::<Vec<_>>(),
        vec![DataValue::Int32(199), DataValue::Int32(3), DataValue::Int32(60)]
    );
}

#[test]
fn bloom_filter_only_narrows() {
    let manager = MemoryBlockManager::new();
    let opts = ColumnWriteOptions {
        rows_per_page: 20,
        bloom_filter: true,
        bloom_filter_fpp: 0.01,
        ..Default::default()
    };
    let segment = int_segment(&manager, &opts);
    let reader = segment.column(0).unwrap();
    assert!(reader.has_bloom_filter_index());

    for target in [55, 1000] {
        let input = SparseRange::from_iter([Range::new(30, 70), Range::new(150, 170)]);
        let mut ranges = input.clone();
        let pred = compare(0, CompareOp::Eq, DataValue::Int32(target));
        reader.bloom_filter(&[pred], &mut ranges).unwrap();
        assert_eq!(ranges.intersection(&input), ranges);
        if target == 55 {
            assert!(ranges.contains(55));
        }
    }

    let plain = int_segment(&MemoryBlockManager::new(), &pages_of(20));
    let mut ranges = SparseRange::from_range(0, 200);
    let pred = compare(0, CompareOp::Eq, DataValue::Int32(1));
    let err = plain
        .column(0)
        .unwrap()
        .bloom_filter(&[pred], &mut ranges)
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn missing_columns_use_default_values() {
    let manager = MemoryBlockManager::new();
    let mut builder = SegmentFileBuilder::new();
    builder
        .add_column(0, &DataType::Int32, false, &ints(0..50), &pages_of(16))
        .unwrap();
    let tablet = TabletSchema::new(vec![
        TabletColumn::new(0, "k", DataType::Int32, false),
        TabletColumn::new(7, "d", DataType::Varchar(10), false).with_default("hello"),
        TabletColumn::new(8, "n", DataType::Int64, true),
        TabletColumn::new(9, "bad", DataType::Int64, false),
    ]);
    let segment = open(
        &manager,
        builder.finish(),
        tablet,
        &SegmentOptions::default_for_test(),
    )
    .unwrap();
    assert!(segment.column(1).is_none());

    let schema: SchemaRef = Arc::new(segment.tablet_schema().schema_for(&[0, 1, 2]));
    let mut iter = segment
        .new_iterator(&schema, &SegmentReadOptions::default())
        .unwrap();
    let mut rows = 0;
    while let Some(chunk) = iter.next_batch().unwrap() {
        for i in 0..chunk.num_rows() {
            assert_eq!(
                chunk.get_column_by_index(1).value_at(i),
                DataValue::String("hello".into())
            );
            assert!(chunk.get_column_by_index(2).is_null(i));
        }
        rows += chunk.num_rows();
    }
    assert_eq!(rows, 50);

    let schema: SchemaRef = Arc::new(segment.tablet_schema().schema_for(&[0, 3]));
    let mut iter = segment
        .new_iterator(&schema, &SegmentReadOptions::default())
        .unwrap();
    let err = iter.next_batch().unwrap_err();
    assert!(err.is_internal());
    assert!(err.to_string().contains("bad"));
}

#[test]
fn concurrent_index_loads_share_one_reader() {
    let manager = MemoryBlockManager::new();
    let segment = int_segment(&manager, &pages_of(10));
    let reader = segment.column(0).unwrap();
    let loaded: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| reader.load_ordinal_index().unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(loaded[0].num_pages(), 20);
    assert!(loaded.iter().all(|index| Arc::ptr_eq(index, &loaded[0])));
}

#[test]
fn stored_types_are_converted() {
    let manager = MemoryBlockManager::new();
    let mut builder = SegmentFileBuilder::new();
    builder
        .add_column(0, &DataType::Int32, false, &ints(0..100), &pages_of(40))
        .unwrap();
    let tablet = TabletSchema::new(vec![TabletColumn::new(0, "k", DataType::Int64, false)]);
    let segment = open(
        &manager,
        builder.finish(),
        tablet,
        &SegmentOptions::default_for_test(),
    )
    .unwrap();
    assert_eq!(segment.column_storage_types(), Some(&[DataType::Int32][..]));

    let mut opts = SegmentReadOptions::default();
    opts.predicates.insert(
        0,
        vec![Arc::new(ComparePredicate::new(0, CompareOp::Lt, DataValue::Int64(3))) as ColumnPredicateRef],
    );
    let mut iter = segment.new_iterator(&full_schema(&segment), &opts).unwrap();
    assert_eq!(
        collect(&mut *iter, 0),
        (0..3).map(DataValue::Int64).collect::<Vec<_>>()
    );
}

#[test_case(EncodingTypePb::PlainEncoding, CompressionTypePb::NoCompression)]
#[test_case(EncodingTypePb::DictEncoding, CompressionTypePb::NoCompression)]
#[test_case(EncodingTypePb::DictEncoding, CompressionTypePb::Lz4)]
#[test_case(EncodingTypePb::PlainEncoding, CompressionTypePb::Lz4)]
fn nullable_strings(encoding: EncodingTypePb, compression: CompressionTypePb) {
    let values: Vec<DataValue> = (0..300)
        .map(|i| match i % 7 {
            0 => DataValue::Null,
            r => DataValue::String(format!("value-{r}")),
        })
        .collect();
    let mut builder = SegmentFileBuilder::new();
    let opts = ColumnWriteOptions {
        rows_per_page: 64,
        encoding,
        compression,
        ..Default::default()
    };
    builder
        .add_column(0, &DataType::Varchar(16), true, &values, &opts)
        .unwrap();
    let tablet = TabletSchema::new(vec![TabletColumn::new(0, "s", DataType::Varchar(16), true)]);
    let manager = MemoryBlockManager::new();
    let segment = open(
        &manager,
        builder.finish(),
        tablet,
        &SegmentOptions::default_for_test(),
    )
    .unwrap();
    let mut iter = segment
        .new_iterator(&full_schema(&segment), &SegmentReadOptions::default())
        .unwrap();
    assert_eq!(collect(&mut *iter, 0), values);

    let mut opts = SegmentReadOptions::default();
    opts.predicates
        .insert(0, vec![Arc::new(NullPredicate::is_null(0)) as ColumnPredicateRef]);
    let mut iter = segment.new_iterator(&full_schema(&segment), &opts).unwrap();
    assert_eq!(collect(&mut *iter, 0).len(), 43);
}

#[test]
fn array_columns() {
    let values: Vec<DataValue> = (0..50)
        .map(|i| match i % 5 {
            0 => DataValue::Null,
            n => DataValue::List((0..n).map(|j| DataValue::Int32(i * 10 + j)).collect()),
        })
        .collect();
    let ty = DataType::Array(Box::new(DataType::Int32));
    let mut builder = SegmentFileBuilder::new();
    builder
        .add_column(3, &ty, true, &values, &pages_of(8))
        .unwrap();
    let tablet = TabletSchema::new(vec![TabletColumn::new(3, "a", ty.clone(), true)]);
    let manager = MemoryBlockManager::new();
    let segment = open(
        &manager,
        builder.finish(),
        tablet,
        &SegmentOptions::default_for_test(),
    )
    .unwrap();
    let reader = segment.column(0).unwrap();
    assert!(reader.is_array());
    assert_eq!(reader.column_type(), &ty);

    let mut iter = segment
        .new_iterator(&full_schema(&segment), &SegmentReadOptions::default())
        .unwrap();
    assert_eq!(collect(&mut *iter, 0), values);

    let mut opts = SegmentReadOptions::default();
    opts.ranges = Some(SparseRange::from_iter([Range::new(3, 7), Range::new(40, 42)]));
    let mut iter = segment.new_iterator(&full_schema(&segment), &opts).unwrap();
    let expected: Vec<_> = [3usize, 4, 5, 6, 40, 41].map(|i| values[i].clone()).to_vec();
    assert_eq!(collect(&mut *iter, 0), expected);
}

#[test]
fn bitmap_index_prunes_rows() {
    let values: Vec<DataValue> = (0..120)
        .map(|i| DataValue::String(["a", "b", "c"][i % 3].into()))
        .collect();
    let mut builder = SegmentFileBuilder::new();
    let opts = ColumnWriteOptions {
        rows_per_page: 50,
        bitmap_index: true,
        ..Default::default()
    };
    builder
        .add_column(0, &DataType::Varchar(4), false, &values, &opts)
        .unwrap();
    let tablet = TabletSchema::new(vec![TabletColumn::new(0, "s", DataType::Varchar(4), false)]);
    let manager = MemoryBlockManager::new();
    let segment = open(
        &manager,
        builder.finish(),
        tablet,
        &SegmentOptions::default_for_test(),
    )
    .unwrap();

    let mut opts = SegmentReadOptions::default();
    opts.predicates.insert(
        0,
        vec![compare(0, CompareOp::Eq, DataValue::String("b".into()))],
    );
    let stats = opts.stats.clone().unwrap();
    let mut iter = segment.new_iterator(&full_schema(&segment), &opts).unwrap();
    let read = collect(&mut *iter, 0);
    assert_eq!(read.len(), 40);
    assert!(read.iter().all(|v| v == &DataValue::String("b".into())));
    assert_eq!(ReaderStatistics::get(&stats.rows_bitmap_index_filtered), 80);
    assert_eq!(ReaderStatistics::get(&stats.rows_vec_cond_filtered), 0);
}

#[test]
fn short_key_ranges() {
    let keys = ints(0..200);
    let mut builder = SegmentFileBuilder::new();
    builder
        .add_column(0, &DataType::Int32, false, &keys, &pages_of(64))
        .unwrap();
    builder.add_short_key_index(20, &[keys.as_slice()]).unwrap();
    let tablet = TabletSchema::new(vec![
        TabletColumn::new(0, "k", DataType::Int32, false).with_key(true)
    ]);
    let manager = MemoryBlockManager::new();
    let segment = open(
        &manager,
        builder.finish(),
        tablet,
        &SegmentOptions::default_for_test(),
    )
    .unwrap();

    let encode = |v: i32| {
        let mut key = vec![];
        encode_short_key(&[DataValue::Int32(v)], &mut key);
        Some(Bytes::from(key))
    };
    let mut opts = SegmentReadOptions::default();
    opts.short_key_ranges = vec![ShortKeyRange {
        lower: encode(50),
        upper: encode(80),
    }];
    let stats = opts.stats.clone().unwrap();
    let mut iter = segment.new_iterator(&full_schema(&segment), &opts).unwrap();
    let read = collect(&mut *iter, 0);
    assert_eq!(read, ints(40..100));
    assert_eq!(ReaderStatistics::get(&stats.rows_key_range_filtered), 140);
}

#[test]
fn delete_predicates_drop_rows() {
    let manager = MemoryBlockManager::new();
    let segment = int_segment(&manager, &pages_of(50));
    let mut opts = SegmentReadOptions::default();
    opts.delete_predicates
        .insert(0, compare(0, CompareOp::Lt, DataValue::Int32(10)));
    opts.chunk_size = 64;
    let stats = opts.stats.clone().unwrap();
    let mut iter = segment.new_iterator(&full_schema(&segment), &opts).unwrap();
    assert_eq!(collect(&mut *iter, 0), ints(10..200));
    assert_eq!(ReaderStatistics::get(&stats.rows_del_filtered), 10);
}

#[test]
fn chunks_respect_chunk_size() {
    let manager = MemoryBlockManager::new();
    let segment = int_segment(&manager, &pages_of(100));
    let opts = SegmentReadOptions {
        chunk_size: 33,
        ..Default::default()
    };
    let mut iter = segment.new_iterator(&full_schema(&segment), &opts).unwrap();
    let mut sizes = vec![];
    while let Some(chunk) = iter.next_batch().unwrap() {
        sizes.push(chunk.num_rows());
    }
    assert_eq!(sizes, vec![33, 33, 33, 33, 33, 33, 2]);
}

#[test]
fn page_cache_serves_repeated_reads() {
    let manager = MemoryBlockManager::new();
    let mut builder = SegmentFileBuilder::new();
    builder
        .add_column(0, &DataType::Int32, false, &ints(0..100), &pages_of(25))
        .unwrap();
    let tablet = TabletSchema::new(vec![TabletColumn::new(0, "k", DataType::Int32, false)]);
    let options = SegmentOptions {
        mem_tracker: MemTracker::new("cache-test"),
        ..SegmentOptions::with_page_cache_capacity(1 << 20)
    };
    let segment = open(&manager, builder.finish(), tablet, &options).unwrap();

    let mut cached = HashSet::new();
    for _ in 0..2 {
        let opts = SegmentReadOptions::default();
        let stats = opts.stats.clone().unwrap();
        let mut iter = segment.new_iterator(&full_schema(&segment), &opts).unwrap();
        assert_eq!(collect(&mut *iter, 0).len(), 100);
        cached.insert(ReaderStatistics::get(&stats.cached_pages_read));
    }
    assert!(cached.contains(&0));
    assert!(cached.contains(&4));
    assert!(options.mem_tracker.consumption() > 0);
}

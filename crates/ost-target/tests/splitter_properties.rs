//! 区间拆分的性质测试。

use ost_core::PAGE_SIZE;
use ost_core::wire::{IoObject, RemoteRange};
use ost_target::SplitError;
use ost_target::splitter::{page_count, split};
use proptest::prelude::*;
use std::borrow::Cow;

/// 生成单个对象内严格递增、长度非零的区间。
fn increasing_ranges() -> impl Strategy<Value = Vec<RemoteRange>> {
    let part = (
        1u64..3 * PAGE_SIZE as u64,
        1u32..4 * PAGE_SIZE as u32,
        any::<u32>(),
    );
    prop::collection::vec(part, 1..12).prop_map(|parts| {
        let mut offset = 0u64;
        parts
            .into_iter()
            .map(|(gap, len, flags)| {
                offset += gap;
                let range = RemoteRange::new(offset, len, flags);
                offset += len as u64;
                range
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn pieces_stay_within_a_page_and_cover_every_byte(ranges in increasing_ranges()) {
        let mut objects = [IoObject::new(1, 0, ranges.len() as u32)];
        let local = split(&mut objects, &ranges).unwrap();

        let expected: u64 = ranges.iter().map(page_count).sum();
        prop_assert_eq!(local.len() as u64, expected);
        prop_assert_eq!(objects[0].range_count as u64, expected);

        let mut pieces = local.iter();
        for range in &ranges {
            let mut cursor = range.offset;
            for _ in 0..page_count(range) {
                let piece = pieces.next().unwrap();
                prop_assert_eq!(piece.offset, cursor);
                prop_assert_eq!(piece.flags, range.flags);
                prop_assert!(piece.len > 0);
                let first_page = piece.offset / PAGE_SIZE as u64;
                let last_page = (piece.end() - 1) / PAGE_SIZE as u64;
                prop_assert_eq!(first_page, last_page);
                cursor += piece.len as u64;
            }
            prop_assert_eq!(cursor, range.end());
        }
        prop_assert!(pieces.next().is_none());
    }

    #[test]
    fn split_output_is_a_fixed_point(ranges in increasing_ranges()) {
        let mut objects = [IoObject::new(1, 0, ranges.len() as u32)];
        let first = split(&mut objects, &ranges).unwrap().into_owned();

        let mut again = objects.clone();
        let second = split(&mut again, &first).unwrap();
        prop_assert!(matches!(second, Cow::Borrowed(_)));
        prop_assert_eq!(again[0].range_count, objects[0].range_count);
    }

    #[test]
    fn any_non_increasing_offset_is_rejected(
        ranges in increasing_ranges().prop_filter("needs two ranges", |r| r.len() >= 2),
        pick in any::<prop::sample::Index>(),
    ) {
        let mut broken = ranges.clone();
        let at = 1 + pick.index(broken.len() - 1);
        broken[at].offset = broken[at - 1].offset;

        let mut objects = [IoObject::new(1, 0, broken.len() as u32)];
        let err = split(&mut objects, &broken).unwrap_err();
        prop_assert!(
            matches!(err, SplitError::NotIncreasing { object: 0, range, .. } if range == at),
            "unexpected error {:?}",
            err
        );
        prop_assert_eq!(objects[0].range_count as usize, broken.len());
    }
}

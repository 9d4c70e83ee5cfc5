use super::*;

fn fold<F, K, V, IN, OUT>(function: &mut F, inputs: Vec<(K, IN)>) -> Vec<OUT>
where
    F: CombineFunction<K, V, IN, OUT>,
    K: Eq + Hash,
{
    let mut bundle = Bundle::new();
    for (key, input) in inputs {
        bundle
            .merge(key, |acc| function.add_input(acc, input))
            .unwrap();
    }
    let mut out = Vec::new();
    function.collect(&bundle, &mut out).unwrap();
    out
}

#[test]
fn test_sum_count_first_input_matches_one_element_accumulator() {
    let mut function = SumCountCombine;
    let out = fold(&mut function, vec![(7u32, (7u32, 21.5))]);
    assert_eq!(out, vec![(7u32, SumCount::of(21.5))]);
}

#[test]
fn test_sum_count_folds_in_arrival_order() {
    let mut function = SumCountCombine;
    let out = fold(
        &mut function,
        vec![(1u32, (1u32, 1.0)), (1, (1, 2.0)), (1, (1, 3.0))],
    );
    assert_eq!(out, vec![(1u32, SumCount::new(6.0, 3))]);
    assert_eq!(out[0].1.average(), Some(2.0));
}

#[test]
fn test_sum_count_is_order_insensitive() {
    let mut function = SumCountCombine;
    let forward = fold(&mut function, vec![(3u32, (3u32, 4.0)), (3, (3, 6.0))]);
    let backward = fold(&mut function, vec![(3u32, (3u32, 6.0)), (3, (3, 4.0))]);
    assert_eq!(forward, backward);
}

#[test]
fn test_sum_count_merge_and_average() {
    let a = SumCount::new(10.0, 2);
    let b = SumCount::new(5.0, 3);
    let merged = a.merge(b);
    assert_eq!(merged, SumCount::new(15.0, 5));
    assert_eq!(merged.average(), Some(3.0));
    assert_eq!(SumCount::default().average(), None);
}

#[test]
fn test_count_combine_per_key() {
    let mut function = CountCombine;
    let mut out: Vec<(String, u64)> = fold(
        &mut function,
        vec![
            ("a".to_string(), ("a".to_string(), "x")),
            ("b".to_string(), ("b".to_string(), "y")),
            ("a".to_string(), ("a".to_string(), "z")),
        ],
    );
    out.sort();
    assert_eq!(out, vec![("a".to_string(), 2), ("b".to_string(), 1)]);
}

#[test]
fn test_collect_on_empty_bundle_emits_nothing() {
    let mut function = CountCombine;
    let bundle: Bundle<String, u64> = Bundle::new();
    let mut out: Vec<(String, u64)> = Vec::new();
    <CountCombine as CombineFunction<String, u64, (String, ()), (String, u64)>>::collect(
        &mut function,
        &bundle,
        &mut out,
    )
    .unwrap();
    assert!(out.is_empty());
}

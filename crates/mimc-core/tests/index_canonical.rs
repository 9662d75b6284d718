use mimc_core::MultiIndex;
use proptest::prelude::*;

proptest! {
    #[test]
    fn padding_with_zeros_is_invisible(coords in prop::collection::vec(0u32..5, 0..6), pad in 0usize..4) {
        let mut padded = coords.clone();
        padded.extend(std::iter::repeat(0).take(pad));
        let a = MultiIndex::new(coords.clone());
        let b = MultiIndex::new(padded);
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.dense(coords.len()), coords);
    }

    #[test]
    fn forward_then_backward_is_identity(coords in prop::collection::vec(0u32..5, 0..6), d in 0usize..6) {
        let index = MultiIndex::new(coords);
        let stepped = index.forward(d);
        prop_assert_eq!(stepped.order(), index.order() + 1);
        prop_assert_eq!(stepped.backward(d), Some(index));
    }
}

#[test]
fn json_form_is_a_plain_array() {
    let index = MultiIndex::new(vec![1, 0, 2, 0]);
    let json = serde_json::to_string(&index).expect("serialize");
    assert_eq!(json, "[1,0,2]");
    let back: MultiIndex = serde_json::from_str("[1,0,2,0,0]").expect("deserialize");
    assert_eq!(back, index);
}

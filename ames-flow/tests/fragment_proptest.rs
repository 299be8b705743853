use ames_flow::{MessageSink, SinkGift, StaticFragment};
use ames_proto::{FragmentNum, MessageNum};
use bytes::Bytes;
use proptest::prelude::*;

proptest! {
    /// Fragment-then-reassemble returns the original blob for any
    /// size, including empty and non-multiples of the fragment size.
    #[test]
    fn fragment_reassemble_round_trips(data in prop::collection::vec(any::<u8>(), 0..5000)) {
        let blob = Bytes::from(data);
        let num_fragments = StaticFragment::count_for(blob.len());
        let fragments: Vec<StaticFragment> = (0..num_fragments.0)
            .map(|i| StaticFragment {
                message_num: MessageNum(0),
                num_fragments,
                fragment_num: FragmentNum(i),
                blob: blob.clone(),
            })
            .collect();

        let total: usize = fragments.iter().map(|f| f.slice().len()).sum();
        prop_assert_eq!(total, blob.len());

        let mut sink = MessageSink::default();
        let mut delivered = None;
        for fragment in &fragments {
            let mut gifts = Vec::new();
            sink.hear_fragment(
                fragment.message_num,
                fragment.num_fragments,
                fragment.fragment_num,
                fragment.slice(),
                &mut gifts,
            ).unwrap();
            for gift in gifts {
                if let SinkGift::Deliver { blob, .. } = gift {
                    delivered = Some(blob);
                }
            }
        }
        prop_assert_eq!(delivered.as_ref(), Some(&blob));
    }
}

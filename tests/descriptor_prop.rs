use proptest::prelude::*;
use quickcheck::quickcheck;
use h5calib::{decode, encoded_length, DecodeError, Descriptor};

fn path() -> impl Strategy<Value = String> {
    "/[a-zA-Z0-9_/]{0,24}"
}

fn descriptor() -> impl Strategy<Value = Descriptor> {
    (
        0u8..3,
        any::<u32>(),
        any::<u32>(),
        any::<u32>(),
        any::<u32>(),
        1u32..2048,
        1u32..2048,
        path(),
        path(),
    )
        .prop_map(|(alg, tag, cell, index, cells, h, w, raw, calib)| match alg {
            0 => Descriptor::pedestal_v1(tag, index, h, w, &raw, &calib).unwrap(),
            1 => Descriptor::agipd_v1(tag, cell, index, cells, h, w, &raw, &calib).unwrap(),
            _ => Descriptor::agipd_v2(tag, cell, index, cells, h, w, &raw, &calib).unwrap(),
        })
}

proptest! {
    #[test]
    fn decode_reproduces_fields(d in descriptor(), pad in 0usize..16) {
        let mut bytes = d.to_bytes();
        prop_assert_eq!(bytes.len(), d.encoded_length());
        bytes.extend(std::iter::repeat(0u8).take(pad));
        let back = decode(&bytes).unwrap();
        prop_assert_eq!(&back, &d);
        prop_assert_eq!(back.to_bytes(), bytes[..d.encoded_length()].to_vec());
    }

    #[test]
    fn every_strict_prefix_fails(d in descriptor()) {
        let bytes = d.to_bytes();
        for cut in 0..bytes.len() {
            let res = decode(&bytes[..cut]);
            prop_assert!(res.is_err());
            if cut >= 4 {
                prop_assert!(matches!(res, Err(DecodeError::Truncated { .. })), "expected Truncated, got {:?}", res);
            }
        }
    }

    #[test]
    fn decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..96)) {
        let _ = decode(&data);
    }
}

quickcheck! {
    fn encoded_length_matches_decode(data: Vec<u8>) -> bool {
        encoded_length(&data).ok() == decode(&data).ok().map(|d| d.encoded_length())
    }
}

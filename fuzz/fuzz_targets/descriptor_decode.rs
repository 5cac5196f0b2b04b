use honggfuzz::fuzz;

fn main() {
    loop {
        fuzz!(|data: &[u8]| {
            if let Ok(desc) = h5calib::decode(data) {
                assert!(desc.encoded_length() <= data.len());
                assert_eq!(desc.to_bytes(), &data[..desc.encoded_length()]);
            }
        });
    }
}

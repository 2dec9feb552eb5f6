#![no_main]
use libfuzzer_sys::fuzz_target;

use dns_types::protocol::types::Message;
use spoofmx::forge::handle_raw_message;
use spoofmx::settings::Settings;

fuzz_target!(|data: &[u8]| {
    if let Ok((_, response)) = handle_raw_message(&Settings::default(), data) {
        let serialised = response.to_octets().unwrap();
        assert_eq!(data[..2], serialised[..2]);
        assert_eq!(Ok(response), Message::from_octets(&serialised));
    }
});

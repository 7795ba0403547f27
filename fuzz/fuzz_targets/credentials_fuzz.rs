#![no_main]
use boxmount::modules::credentials::Credentials;
use libfuzzer_sys::fuzz_target;
use secrecy::ExposeSecret;

fuzz_target!(|data: &[u8]| {
    if let Ok(contents) = std::str::from_utf8(data) {
        if let Ok(credentials) = Credentials::parse(contents) {
            // Whatever parses must survive being written back out.
            let reparsed = Credentials::parse(&credentials.to_file_contents())
                .expect("written credentials parse");
            assert_eq!(reparsed.username, credentials.username);
            assert_eq!(
                reparsed.password.expose_secret(),
                credentials.password.expose_secret()
            );
        }
    }
});

const CONFIG_ENV: [&str; 5] = [
    "LIGHTNODE_WIFI_SSID",
    "LIGHTNODE_WIFI_PASS",
    "LIGHTNODE_WIFI_CHANNEL",
    "LIGHTNODE_ENDPOINT",
    "LIGHTNODE_API_KEY",
];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=sdkconfig.defaults");
    for name in CONFIG_ENV {
        println!("cargo:rerun-if-env-changed={name}");
    }

    println!("cargo:rerun-if-env-changed=ESP_IDF_SDKCONFIG_DEFAULTS");

    if std::env::var_os("CARGO_FEATURE_ESP32").is_some() {
        let defaults = std::env::var("ESP_IDF_SDKCONFIG_DEFAULTS").unwrap_or_default();
        if !defaults.ends_with("sdkconfig.defaults") {
            println!(
                "cargo:warning=ESP_IDF_SDKCONFIG_DEFAULTS does not name device/sdkconfig.defaults; \
                 HTTPS requests will fail certificate checks"
            );
        }
        embuild::espidf::sysenv::output();
    }
}

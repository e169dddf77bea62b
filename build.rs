fn main() {
    println!("cargo:rerun-if-changed=config/bridge.json");

    // ESP-IDF link environment is only needed for device builds; host
    // builds of the library and its tests skip it.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}

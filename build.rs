fn main() {
    let now = time::OffsetDateTime::now_utc();
    let date_fmt = time::format_description::parse("[year]-[month]-[day]")
        .expect("valid date format");
    let time_fmt = time::format_description::parse("[hour]:[minute]:[second]")
        .expect("valid time format");

    // Reproducible builds can pin the stamp
    let date = std::env::var("SAO_BUILD_DATE")
        .unwrap_or_else(|_| now.format(&date_fmt).unwrap_or_else(|_| "unknown".to_string()));
    let time = std::env::var("SAO_BUILD_TIME")
        .unwrap_or_else(|_| now.format(&time_fmt).unwrap_or_else(|_| "unknown".to_string()));

    println!("cargo:rustc-env=SAO_BUILD_DATE={}", date);
    println!("cargo:rustc-env=SAO_BUILD_TIME={}", time);
    println!("cargo:rerun-if-env-changed=SAO_BUILD_DATE");
    println!("cargo:rerun-if-env-changed=SAO_BUILD_TIME");
}

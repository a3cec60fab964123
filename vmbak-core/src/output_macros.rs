//! Console output macros shared across the vmbak crates.
//!
//! Operator-facing output (summaries, fatal errors) goes through these;
//! diagnostic logging goes through `tracing`.

#[macro_export]
macro_rules! vmbak_println {
    () => {
        println!();
    };
    ($($arg:tt)*) => {
        println!("{}", format!($($arg)*));
    }
}

#[macro_export]
macro_rules! vmbak_error {
    ($($arg:tt)*) => {
        eprintln!("❌ {}", format!($($arg)*));
    }
}

#[macro_export]
macro_rules! vmbak_warning {
    ($($arg:tt)*) => {
        eprintln!("⚠ {}", format!($($arg)*));
    }
}

#[macro_export]
macro_rules! vmbak_success {
    ($($arg:tt)*) => {
        eprintln!("✓ {}", format!($($arg)*));
    }
}

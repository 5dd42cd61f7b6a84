use std::io::{self, Write};

pub fn show_menu(dashboard_name: &str) {
    println!("\n===========================================");
    println!("{} Dashboard", dashboard_name);
    println!("===========================================");
    println!("Select an option:");
    println!("1. Show Panels");
    println!("2. Toggle Pump 1");
    println!("3. Toggle Pump 2");
    println!("4. Toggle Tank Pump");
    println!("5. Publish a Sensor Reading");
    println!("6. Status Log & Diagnostics");
    println!("7. Export CSV");
    println!("8. Exit");
    println!("===========================================");
    prompt("Choice (1-8): ");
}

pub fn prompt(text: &str) {
    print!("{}", text);
    let _ = io::stdout().flush();
}

/// `None` on EOF or a read error.
pub fn read_line() -> Option<String> {
    let mut input = String::new();
    match io::stdin().read_line(&mut input) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(input.trim().to_string()),
    }
}

pub fn get_user_choice() -> Option<Result<u32, std::num::ParseIntError>> {
    read_line().map(|line| line.parse::<u32>())
}

pub fn wait_for_enter() {
    println!("\nPress Enter to return to menu...");
    let _ = read_line();
}

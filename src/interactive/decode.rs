use crate::errors::Error;
use crate::wire::Message;

/// Decodes one hex-encoded wire message and prints it as JSON.
pub fn run(message_hex: &str) -> Result<(), Error> {
    let bytes = match hex::decode(message_hex.trim()) {
        Ok(bytes) => bytes,
        Err(err) => {
            println!("Invalid hex: {}", err);
            return Ok(());
        }
    };

    let msg = Message::decode(&bytes)?;
    println!("Type: {} ({})", msg.type_name(), msg.msg_type());
    match serde_json::to_string_pretty(&msg) {
        Ok(json) => println!("{}", json),
        Err(_) => println!("{:?}", msg),
    }

    let reencoded = msg.encode()?;
    if reencoded != bytes {
        println!("Note: re-encoding differs from the input");
    }
    Ok(())
}

#![no_std]
#![no_main]

use defmt_rtt as _;
use panic_probe as _;

#[embassy_executor::main]
async fn main(_spawner: embassy_executor::Spawner) -> ! {
    pico_iec_rs::common_main(env!("CARGO_BIN_NAME"))
}

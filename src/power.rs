use embedded_hal::digital::OutputPin;

use crate::{clock::Clock, error::Error, module_timing};

/// Switch the module on by pulsing its power key low, then wait for it to boot.
pub(crate) fn power_on<P, C>(pin: &mut P, clock: &C) -> Result<(), Error>
where
    P: OutputPin,
    C: Clock,
{
    debug!("Attempting to power up device");

    pin.set_low().map_err(|_| Error::IoPin)?;
    clock.delay(module_timing::pwr_on_time());
    pin.set_high().map_err(|_| Error::IoPin)?;
    clock.delay(module_timing::boot_time());

    debug!("Powered up");
    Ok(())
}

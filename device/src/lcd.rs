//! HD44780 character LCD behind a PCF8574 I2C backpack, driven in 4-bit mode.
//!
//! Backpack wiring: P0=RS, P1=RW, P2=EN, P3=backlight, P4..P7=D4..D7.

use embedded_hal::{delay::DelayNs, i2c::I2c};
use lightnode_common::{Display, NodeError};

const RS: u8 = 0x01;
const EN: u8 = 0x04;
const BACKLIGHT: u8 = 0x08;

const CMD_CLEAR: u8 = 0x01;
const CMD_ENTRY_MODE_INCREMENT: u8 = 0x06;
const CMD_DISPLAY_ON: u8 = 0x0C;
const CMD_FUNCTION_4BIT_2LINE: u8 = 0x28;
const CMD_SET_DDRAM: u8 = 0x80;

const ROW_OFFSETS: [u8; 4] = [0x00, 0x40, 0x14, 0x54];

pub struct CharLcd<I, D> {
    i2c: I,
    delay: D,
    address: u8,
    columns: u8,
    rows: u8,
}

impl<I: I2c, D: DelayNs> CharLcd<I, D> {
    pub fn new(i2c: I, delay: D, address: u8, columns: u8, rows: u8) -> Self {
        Self {
            i2c,
            delay,
            address,
            columns,
            rows,
        }
    }

    /// Power-on reset into 4-bit mode, then clear with the backlight on.
    pub fn init(&mut self) -> Result<(), I::Error> {
        self.delay.delay_ms(50);
        self.expander_write(0)?;
        self.delay.delay_ms(1);

        // Three 8-bit "function set" nibbles resync the controller whatever mode it was in.
        self.write_nibble(0x30, 0)?;
        self.delay.delay_us(4_500);
        self.write_nibble(0x30, 0)?;
        self.delay.delay_us(4_500);
        self.write_nibble(0x30, 0)?;
        self.delay.delay_us(150);
        self.write_nibble(0x20, 0)?;

        self.command(CMD_FUNCTION_4BIT_2LINE)?;
        self.command(CMD_DISPLAY_ON)?;
        self.clear_screen()?;
        self.command(CMD_ENTRY_MODE_INCREMENT)?;
        Ok(())
    }

    pub fn clear_screen(&mut self) -> Result<(), I::Error> {
        self.command(CMD_CLEAR)?;
        self.delay.delay_ms(2);
        Ok(())
    }

    pub fn set_cursor(&mut self, column: u8, row: u8) -> Result<(), I::Error> {
        let row = row.min(self.rows.saturating_sub(1)) as usize;
        let column = column.min(self.columns.saturating_sub(1));
        self.command(CMD_SET_DDRAM | (ROW_OFFSETS[row] + column))
    }

    pub fn print(&mut self, text: &str) -> Result<(), I::Error> {
        for ch in text.chars() {
            self.send(lcd_char(ch), RS)?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn release(self) -> (I, D) {
        (self.i2c, self.delay)
    }

    fn command(&mut self, value: u8) -> Result<(), I::Error> {
        self.send(value, 0)
    }

    fn send(&mut self, value: u8, mode: u8) -> Result<(), I::Error> {
        self.write_nibble(value & 0xF0, mode)?;
        self.write_nibble((value << 4) & 0xF0, mode)
    }

    fn write_nibble(&mut self, nibble: u8, mode: u8) -> Result<(), I::Error> {
        let data = nibble | mode;
        self.expander_write(data)?;
        self.expander_write(data | EN)?;
        self.delay.delay_us(1);
        self.expander_write(data & !EN)?;
        self.delay.delay_us(50);
        Ok(())
    }

    fn expander_write(&mut self, data: u8) -> Result<(), I::Error> {
        self.i2c.write(self.address, &[data | BACKLIGHT])
    }
}

/// The controller ROM only covers printable ASCII reliably.
fn lcd_char(ch: char) -> u8 {
    if ch.is_ascii() && !ch.is_ascii_control() {
        ch as u8
    } else if ch == '°' {
        0xDF
    } else {
        b'?'
    }
}

impl<I: I2c, D: DelayNs> Display for CharLcd<I, D> {
    fn clear(&mut self) -> Result<(), NodeError> {
        self.clear_screen()
            .map_err(|err| NodeError::Display(format!("lcd clear failed: {err:?}")))
    }

    fn write_line(&mut self, row: u8, text: &str) -> Result<(), NodeError> {
        if row >= self.rows {
            return Err(NodeError::Display(format!(
                "row {row} outside {}-row display",
                self.rows
            )));
        }
        let columns = self.columns as usize;
        self.set_cursor(0, row)
            .and_then(|_| self.print(&text.chars().take(columns).collect::<String>()))
            .map_err(|err| NodeError::Display(format!("lcd write failed: {err:?}")))
    }

    fn columns(&self) -> usize {
        self.columns as usize
    }
}

pub trait ThousandsSeparated {
    fn thousands_separated(self) -> String;
}
impl ThousandsSeparated for u64 {
    fn thousands_separated(self) -> String {
        let digits = self.to_string();
        let mut separated = String::with_capacity(digits.len() + digits.len() / 3);
        for (position, digit) in digits.chars().enumerate() {
            if position > 0 && (digits.len() - position) % 3 == 0 {
                separated.push(',');
            }
            separated.push(digit);
        }
        separated
    }
}

pub trait StringifyQuoted
where
    Self: Sized,
{
    fn stringify_quoted(self) -> String;
}
impl StringifyQuoted for &[String] {
    fn stringify_quoted(self) -> String {
        self.iter()
            .map(|item| format!("'{item}'"))
            .collect::<Vec<String>>()
            .join(", ")
    }
}

/// `amount0` -> `amount_0`, `tickLower` -> `tick_lower`, `sqrtPriceX96` -> `sqrt_price_x_96`
pub fn to_snake_case(name: &str) -> String {
    let mut snake = String::with_capacity(name.len() + 4);
    let mut previous: Option<char> = None;
    for character in name.chars() {
        let boundary = match previous {
            Some(prev) if prev == '_' => false,
            Some(prev) => {
                (character.is_ascii_uppercase() && !prev.is_ascii_uppercase())
                    || (character.is_ascii_digit() && !prev.is_ascii_digit())
            }
            None => false,
        };
        if boundary {
            snake.push('_');
        }
        snake.push(character.to_ascii_lowercase());
        previous = Some(character);
    }
    snake
}

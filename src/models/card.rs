use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Card rank, ordered low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rank {
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Ten,
    Jack,
    Queen,
    King,
    Ace,
}

impl Rank {
    pub const ALL: [Rank; 13] = [
        Rank::Two,
        Rank::Three,
        Rank::Four,
        Rank::Five,
        Rank::Six,
        Rank::Seven,
        Rank::Eight,
        Rank::Nine,
        Rank::Ten,
        Rank::Jack,
        Rank::Queen,
        Rank::King,
        Rank::Ace,
    ];

    pub fn to_char(self) -> char {
        match self {
            Rank::Two => '2',
            Rank::Three => '3',
            Rank::Four => '4',
            Rank::Five => '5',
            Rank::Six => '6',
            Rank::Seven => '7',
            Rank::Eight => '8',
            Rank::Nine => '9',
            Rank::Ten => 'T',
            Rank::Jack => 'J',
            Rank::Queen => 'Q',
            Rank::King => 'K',
            Rank::Ace => 'A',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        let rank = match c.to_ascii_uppercase() {
            '2' => Rank::Two,
            '3' => Rank::Three,
            '4' => Rank::Four,
            '5' => Rank::Five,
            '6' => Rank::Six,
            '7' => Rank::Seven,
            '8' => Rank::Eight,
            '9' => Rank::Nine,
            'T' => Rank::Ten,
            'J' => Rank::Jack,
            'Q' => Rank::Queen,
            'K' => Rank::King,
            'A' => Rank::Ace,
            _ => return None,
        };
        Some(rank)
    }
}

/// Card suit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Suit {
    Spades,
    Hearts,
    Diamonds,
    Clubs,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Spades, Suit::Hearts, Suit::Diamonds, Suit::Clubs];

    pub fn to_char(self) -> char {
        match self {
            Suit::Spades => 's',
            Suit::Hearts => 'h',
            Suit::Diamonds => 'd',
            Suit::Clubs => 'c',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            's' => Some(Suit::Spades),
            'h' => Some(Suit::Hearts),
            'd' => Some(Suit::Diamonds),
            'c' => Some(Suit::Clubs),
            _ => None,
        }
    }
}

/// A playing card. Serialized in the compact two-character form (`As`, `Td`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Card {
    pub rank: Rank,
    pub suit: Suit,
}

impl Card {
    pub const fn new(rank: Rank, suit: Suit) -> Self {
        Self { rank, suit }
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.rank.to_char(), self.suit.to_char())
    }
}

impl FromStr for Card {
    type Err = String;

    /// Parse `"As"`, `"Td"`, `"9c"`. `"10"` is accepted as ten.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let normalized = s.replace("10", "T");
        let mut chars = normalized.chars();

        let (Some(r), Some(su), None) = (chars.next(), chars.next(), chars.next()) else {
            return Err(format!("Card must be rank + suit, got: {:?}", s));
        };

        let rank = Rank::from_char(r).ok_or_else(|| format!("Invalid rank: {}", r))?;
        let suit = Suit::from_char(su).ok_or_else(|| format!("Invalid suit: {}", su))?;

        Ok(Card { rank, suit })
    }
}

impl TryFrom<String> for Card {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Card> for String {
    fn from(card: Card) -> Self {
        card.to_string()
    }
}

/// Concatenate cards into the compact text form used by the hand store
/// (`"AsKd"`). Unknown cards are skipped.
pub fn cards_to_text<'a, I>(cards: I) -> String
where
    I: IntoIterator<Item = &'a Option<Card>>,
{
    cards
        .into_iter()
        .flatten()
        .map(|c| c.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_round_trip_all_cards() {
        for rank in Rank::ALL {
            for suit in Suit::ALL {
                let text = format!("{}{}", rank.to_char(), suit.to_char());
                let card: Card = text.parse().unwrap();
                assert_eq!(card.to_string(), text);
            }
        }
    }

    #[test]
    fn test_card_parse_lenient_forms() {
        assert_eq!("10h".parse::<Card>().unwrap(), Card::new(Rank::Ten, Suit::Hearts));
        assert_eq!("aS".parse::<Card>().unwrap(), Card::new(Rank::Ace, Suit::Spades));
        assert_eq!(" Kd ".parse::<Card>().unwrap(), Card::new(Rank::King, Suit::Diamonds));
    }

    #[test]
    fn test_card_parse_invalid() {
        assert!("".parse::<Card>().is_err());
        assert!("A".parse::<Card>().is_err());
        assert!("Ax".parse::<Card>().is_err());
        assert!("1s".parse::<Card>().is_err());
        assert!("AsK".parse::<Card>().is_err());
    }

    #[test]
    fn test_card_equality_and_hash() {
        use std::collections::HashSet;

        let a: Card = "As".parse().unwrap();
        let b = Card::new(Rank::Ace, Suit::Spades);
        assert_eq!(a, b);

        let set: HashSet<Card> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_card_serialization() {
        let card = Card::new(Rank::Nine, Suit::Clubs);
        assert_eq!(serde_json::to_string(&card).unwrap(), "\"9c\"");

        let parsed: Card = serde_json::from_str("\"Td\"").unwrap();
        assert_eq!(parsed, Card::new(Rank::Ten, Suit::Diamonds));
        assert!(serde_json::from_str::<Card>("\"Zz\"").is_err());
    }

    #[test]
    fn test_cards_to_text_skips_unknown() {
        let cards = vec![
            Some(Card::new(Rank::Ace, Suit::Spades)),
            None,
            Some(Card::new(Rank::King, Suit::Diamonds)),
        ];
        assert_eq!(cards_to_text(&cards), "AsKd");
    }
}

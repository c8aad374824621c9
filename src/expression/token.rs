use serde::{Deserialize, Serialize};

/// Binary arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl Operator {
    pub fn from_symbol(c: char) -> Option<Self> {
        match c {
            '+' => Some(Operator::Add),
            '-' => Some(Operator::Sub),
            '*' => Some(Operator::Mul),
            '/' => Some(Operator::Div),
            '^' => Some(Operator::Pow),
            _ => None,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            Operator::Add => '+',
            Operator::Sub => '-',
            Operator::Mul => '*',
            Operator::Div => '/',
            Operator::Pow => '^',
        }
    }

    pub fn precedence(self) -> u8 {
        match self {
            Operator::Add | Operator::Sub => 1,
            Operator::Mul | Operator::Div => 2,
            Operator::Pow => 3,
        }
    }

    pub fn is_right_associative(self) -> bool {
        self == Operator::Pow
    }

    /// `first <op> second`. Division by zero yields an infinity or NaN here;
    /// the parser rejects it before an expression is ever scheduled.
    pub fn apply(self, first: f64, second: f64) -> f64 {
        match self {
            Operator::Add => first + second,
            Operator::Sub => first - second,
            Operator::Mul => first * second,
            Operator::Div => first / second,
            Operator::Pow => first.powf(second),
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// One element of a postfix (RPN) sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Token {
    Operand(f64),
    Operator(Operator),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Operand(value) => write!(f, "{}", value),
            Token::Operator(op) => write!(f, "{}", op),
        }
    }
}

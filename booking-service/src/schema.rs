diesel::table! {
    reservations (id) {
        id -> Uuid,
        owner_id -> Uuid,
        kind -> Varchar,
        booking_data -> Jsonb,
        amount -> Numeric,
        reservation_status -> Varchar,
        payment_status -> Varchar,
        payment_details -> Nullable<Jsonb>,
        customer_details -> Jsonb,
        created_at -> Nullable<Timestamptz>,
        confirmed_at -> Nullable<Timestamptz>,
        cancelled_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    venues (id) {
        id -> Uuid,
        name -> Varchar,
    }
}

diesel::table! {
    slots (id) {
        id -> Uuid,
        venue_id -> Uuid,
        starts_at -> Timestamptz,
        ends_at -> Timestamptz,
        price -> Numeric,
        availability -> Varchar,
        reservation_id -> Nullable<Uuid>,
    }
}

diesel::table! {
    events (id) {
        id -> Uuid,
        title -> Varchar,
        seat_price -> Numeric,
        capacity -> Int4,
        booked_seats -> Int4,
    }
}

diesel::table! {
    event_attendees (event_id, user_id) {
        event_id -> Uuid,
        user_id -> Uuid,
    }
}

diesel::table! {
    products (id) {
        id -> Uuid,
        name -> Varchar,
        price -> Numeric,
        stock -> Int4,
    }
}

diesel::table! {
    stock_holds (id) {
        id -> Uuid,
        reservation_id -> Uuid,
        product_id -> Uuid,
        quantity -> Int4,
        status -> Varchar,
    }
}

diesel::table! {
    ledger_entries (order_id) {
        order_id -> Varchar,
        reservation_id -> Uuid,
        amount -> Numeric,
        currency -> Varchar,
        method -> Varchar,
        captured -> Bool,
        captured_at -> Nullable<Timestamptz>,
        payment_id -> Nullable<Varchar>,
        display_name -> Varchar,
        refunded -> Bool,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    reservations,
    venues,
    slots,
    events,
    event_attendees,
    products,
    stock_holds,
    ledger_entries,
);
